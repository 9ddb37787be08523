use dllcall::cli::{usage, EXIT_USAGE};

fn main() {
    match dllcall::cli_main() {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!();
            eprintln!("{}", usage());
            std::process::exit(EXIT_USAGE);
        }
    }
}
