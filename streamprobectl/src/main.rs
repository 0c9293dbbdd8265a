use clap::Parser;

fn main() {
    let cli = streamprobectl::Cli::parse();
    if let Err(err) = streamprobectl::run(cli) {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
