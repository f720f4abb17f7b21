fn main() {
    if !cfg!(target_os = "linux") {
        panic!(
            "{} only works on linux (process memory is accessed through procfs)",
            env!("CARGO_PKG_NAME")
        );
    }
}
