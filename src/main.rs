mod commands;

fn main() {
    commands::init_logging();
    commands::run();
}
