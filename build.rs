use std::env;
use std::fs;
use std::path::Path;

fn main() {
    // Create config template if it doesn't exist
    let out_dir = env::var("OUT_DIR").unwrap_or_else(|_| "./".to_string());
    let template_path = Path::new(&out_dir).join("../../../rtsplive.template.toml");

    let template = r#"# rtsplive configuration template
# Copy this file to 'rtsplive.toml' next to your binary's working directory.
# Every key can also be set through an RTSPLIVE_<KEY> environment variable.

stream_over_tcp = false
receive_buffer_size = 1048576
duration_slop_secs = 2
loop_slice_ms = 50
shutdown_policy = "teardown_on_stop"
connect_timeout_ms = 10000
teardown_timeout_ms = 1000
receiver_report_interval_secs = 5
"#;

    if !template_path.exists() {
        let _ = fs::write(template_path, template);
    }
    println!("cargo:rerun-if-changed=build.rs");
}
