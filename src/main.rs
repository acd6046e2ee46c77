mod cli;

use cli::Cli;

fn main() {
    if let Err(err) = Cli::handle_command_line() {
        eprintln!("{}", err);
        std::process::exit(1);
    }
}
