//! Logging interface
//!
//! Thin forwarding macros over the `log` facade. The completion path logs
//! from the transport's context, so pick a logger that doesn't block for
//! long in `log()`.

macro_rules! trace {
    ($($args:tt)*) => {
        ::log::trace!($($args)*)
    };
}

macro_rules! debug {
    ($($args:tt)*) => {
        ::log::debug!($($args)*)
    };
}

macro_rules! info {
    ($($args:tt)*) => {
        ::log::info!($($args)*)
    };
}

macro_rules! warn {
    ($($args:tt)*) => {
        ::log::warn!($($args)*)
    };
}

macro_rules! error {
    ($($args:tt)*) => {
        ::log::error!($($args)*)
    };
}
