fn main() {
    if let Err(err) = wgpu_deferred::run() {
        eprintln!("Application error: {err}");
    }
}
