use core_config::tracing::install_color_eyre;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    // Before any fallible work so every report gets colour and span traces.
    install_color_eyre();
    registration_server::run().await
}
