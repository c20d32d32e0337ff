fn main() -> std::process::ExitCode {
    fieldsync::run()
}
