//! Kernel log macros.
//!
//! Thin wrappers over the `log` facade. Without the `log` feature the
//! arguments are still type-checked but nothing is emitted.

macro_rules! klog {
    ($level:ident, $($arg:tt)*) => {{
        #[cfg(feature = "log")]
        ::log::$level!(target: "kcore", $($arg)*);
        #[cfg(not(feature = "log"))]
        {
            let _ = core::format_args!($($arg)*);
        }
    }};
}
pub(crate) use klog;

macro_rules! ktrace {
    ($($arg:tt)*) => {{
        $crate::klog::klog!(trace, $($arg)*);
    }};
}
pub(crate) use ktrace;

macro_rules! kdebug {
    ($($arg:tt)*) => {{
        $crate::klog::klog!(debug, $($arg)*);
    }};
}
pub(crate) use kdebug;

macro_rules! kinfo {
    ($($arg:tt)*) => {{
        $crate::klog::klog!(info, $($arg)*);
    }};
}
pub(crate) use kinfo;

macro_rules! kwarn {
    ($($arg:tt)*) => {{
        $crate::klog::klog!(warn, $($arg)*);
    }};
}
pub(crate) use kwarn;

macro_rules! kerror {
    ($($arg:tt)*) => {{
        $crate::klog::klog!(error, $($arg)*);
    }};
}
pub(crate) use kerror;
