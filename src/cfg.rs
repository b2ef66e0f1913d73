// Logging shims over `tracing`.
//
// With the `tracing` feature disabled these expand to nothing, so hot paths pay
// nothing for the events below.

macro_rules! trace {
    ($($tt:tt)*) => {
        #[cfg(feature = "tracing")] {
            tracing::trace!($($tt)*)
        }
    }
}

macro_rules! debug {
    ($($tt:tt)*) => {
        #[cfg(feature = "tracing")] {
            tracing::debug!($($tt)*)
        }
    }
}

macro_rules! warning {
    ($($tt:tt)*) => {
        #[cfg(feature = "tracing")] {
            tracing::warn!($($tt)*)
        }
    }
}

pub(crate) use {debug, trace, warning};
