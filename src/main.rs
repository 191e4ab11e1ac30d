//! Autograder CLI entry point

fn main() {
    autograder::cli::run();
}
