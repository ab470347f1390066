use clap::Parser;
use std::path::PathBuf;

#[derive(Debug, Clone, Parser)]
#[command(
    name = "kubetopo",
    version,
    about = "Navigate a Kubernetes cluster's object topology as a live graph."
)]
pub struct CliArgs {
    /// kubeconfig context to open (defaults to the current context)
    #[arg(long)]
    pub context: Option<String>,

    /// Start with the namespace filter limited to these namespaces
    #[arg(short, long, value_delimiter = ',')]
    pub namespace: Vec<String>,

    /// Maximum number of objects that can be selected at once
    #[arg(long)]
    pub max_selection: Option<usize>,

    /// UI tick interval in milliseconds
    #[arg(long, default_value_t = 250)]
    pub tick_ms: u64,

    /// tracing filter (for example: info,debug,trace)
    #[arg(long, default_value = "info")]
    pub log_filter: String,

    /// Write logs to this file instead of discarding them
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Do not load or save per-cluster filters and zoom
    #[arg(long)]
    pub no_persist: bool,
}

#[cfg(test)]
mod tests {
    use super::CliArgs;
    use clap::Parser;

    #[test]
    fn namespaces_accept_commas_and_repeats() {
        let args = CliArgs::parse_from([
            "kubetopo",
            "-n",
            "default,kube-system",
            "--namespace",
            "apps",
            "--max-selection",
            "5",
        ]);
        assert_eq!(args.namespace, vec!["default", "kube-system", "apps"]);
        assert_eq!(args.max_selection, Some(5));
        assert_eq!(args.tick_ms, 250);
        assert!(!args.no_persist);
    }
}
