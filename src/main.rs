fn main() {
    if let Err(e) = blackboard::run() {
        eprintln!("Error: {}", e);
        std::process::exit(e.exit_code());
    }
}
