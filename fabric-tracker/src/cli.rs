#[derive(clap::Parser)]
#[command(version, about, long_about = None)]
pub(crate) struct Cli {
    /// Address to listen on for peer announce/list requests.
    #[arg(long, default_value = "0.0.0.0:8081")]
    pub(crate) listen: String,
}
