//! ---
//! lcd_section: "03-logging"
//! lcd_subsection: "module"
//! lcd_type: "source"
//! lcd_scope: "code"
//! lcd_description: "Context-enriched logging macros."
//! lcd_version: "v0.1.0"
//! lcd_owner: "tbd"
//! ---
/// Internal helper shared by the level-specific macros.
#[doc(hidden)]
#[macro_export]
macro_rules! __lcd_event {
    ($level:expr, $ctx:expr, $($arg:tt)+) => {{
        let ctx = &$ctx;
        $crate::tracing::event!(
            $level,
            unit = ctx.unit.unwrap_or(""),
            stage = ctx.stage.unwrap_or(""),
            commit = ctx.commit.unwrap_or(""),
            message = %format_args!($($arg)+)
        );
    }};
}

/// Emit an informational log enriched with deployment context.
#[macro_export]
macro_rules! lcd_info {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::__lcd_event!($crate::tracing::Level::INFO, $ctx, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__lcd_event!($crate::tracing::Level::INFO, $crate::LogContext::default(), $($arg)+)
    };
}

/// Emit a debug log enriched with deployment context.
#[macro_export]
macro_rules! lcd_debug {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::__lcd_event!($crate::tracing::Level::DEBUG, $ctx, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__lcd_event!($crate::tracing::Level::DEBUG, $crate::LogContext::default(), $($arg)+)
    };
}

/// Emit a warning log enriched with deployment context.
#[macro_export]
macro_rules! lcd_warn {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::__lcd_event!($crate::tracing::Level::WARN, $ctx, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__lcd_event!($crate::tracing::Level::WARN, $crate::LogContext::default(), $($arg)+)
    };
}

/// Emit an error log enriched with deployment context.
#[macro_export]
macro_rules! lcd_error {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::__lcd_event!($crate::tracing::Level::ERROR, $ctx, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__lcd_event!($crate::tracing::Level::ERROR, $crate::LogContext::default(), $($arg)+)
    };
}
