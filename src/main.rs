fn main() {
    #[cfg(feature = "cli")]
    deltafile::cli::run();

    #[cfg(not(feature = "cli"))]
    {
        eprintln!("deltafile: CLI not enabled. Rebuild with `--features cli`.");
        std::process::exit(1);
    }
}
