use std::panic;
use std::sync::Once;

static INIT: Once = Once::new();

/// Initialise the log backend and install the panic hook. Safe to call
/// more than once.
pub fn init_logging() {
    INIT.call_once(|| {
        let _ = env_logger::Builder::from_env(
            env_logger::Env::default().default_filter_or("info"),
        )
        .try_init();

        set_panic_hook();
        log::info!("logging initialised");
    });
}

/// A panic on the audio thread must leave a trace in the log before the
/// default hook runs; the control surface stays alive so the UI can stop
/// and rebuild the engine.
fn set_panic_hook() {
    let default_hook = panic::take_hook();
    panic::set_hook(Box::new(move |panic_info| {
        let payload = panic_info.payload();
        let msg = if let Some(s) = payload.downcast_ref::<&str>() {
            *s
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.as_str()
        } else {
            "Box<Any>"
        };
        let location = panic_info
            .location()
            .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
            .unwrap_or_else(|| "unknown location".to_string());
        let bt = backtrace::Backtrace::new();

        log::error!("panic: {msg}\nlocation: {location}\nbacktrace:\n{bt:?}");

        default_hook(panic_info);
    }));
}
