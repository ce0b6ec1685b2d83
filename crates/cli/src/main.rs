fn main() {
    if let Err(e) = metascope_cli::run() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
