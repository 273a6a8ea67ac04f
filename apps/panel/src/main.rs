fn main() {
    if let Err(e) = spacedeck_panel::run() {
        eprintln!("spacedeck: {e:#}");
        std::process::exit(1);
    }
}
