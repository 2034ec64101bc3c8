//! Profiling support via Tracy.
//!
//! Compilation and execution are instrumented with the macros below. They are
//! backed by [`tracy_client`] when the `profiling` Cargo feature is enabled and
//! compile to nothing otherwise.
//!
//! ```bash
//! cargo test -p redlilium-framegraph --features profiling
//! ```

#[cfg(feature = "profiling")]
pub use tracy_client::{self, Client, frame_mark as tracy_frame_mark, plot as tracy_plot, span};

/// Open a Tracy zone named `$name` that closes with the enclosing block.
#[macro_export]
#[cfg(feature = "profiling")]
macro_rules! profile_scope {
    ($name:expr) => {
        let _profile_span = $crate::profiling::span!($name);
    };
}

/// Expands to nothing without the `profiling` feature.
#[macro_export]
#[cfg(not(feature = "profiling"))]
macro_rules! profile_scope {
    ($name:expr) => {};
}

/// Tell Tracy a frame has been submitted.
#[macro_export]
#[cfg(feature = "profiling")]
macro_rules! frame_mark {
    () => {
        $crate::profiling::tracy_frame_mark()
    };
}

/// Expands to nothing without the `profiling` feature.
#[macro_export]
#[cfg(not(feature = "profiling"))]
macro_rules! frame_mark {
    () => {};
}

/// Plot a value over time in Tracy, such as transient memory per compile.
#[macro_export]
#[cfg(feature = "profiling")]
macro_rules! profile_plot {
    ($name:expr, $value:expr) => {
        $crate::profiling::tracy_plot!($name, $value as f64)
    };
}

/// Evaluates `$value` and discards it without the `profiling` feature.
#[macro_export]
#[cfg(not(feature = "profiling"))]
macro_rules! profile_plot {
    ($name:expr, $value:expr) => {
        let _ = $value;
    };
}

/// Connect to Tracy. Idempotent, but should run before the first compile.
#[cfg(feature = "profiling")]
pub fn init() {
    Client::start();
    log::info!("Tracy profiling enabled");
}

/// Does nothing without the `profiling` feature.
#[cfg(not(feature = "profiling"))]
pub fn init() {}
