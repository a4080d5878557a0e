use tracing::*;

pub fn init(verbosity: u8) {
    let filt = tracing_subscriber::EnvFilter::from_default_env().add_directive(
        match verbosity {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
        .parse()
        .expect("logging: parse directive"),
    );
    tracing_subscriber::fmt()
        .compact()
        .with_env_filter(filt)
        .init();
    info!("logging started");
}
