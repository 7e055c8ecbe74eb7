/// webhost build script.
///
/// The portable core (decoder, scheduler, pump, headless backend) builds on
/// every target; only the Win32 window and the WebView2 host need Windows.
/// Say so once instead of leaving a binary that only prints an error.
fn main() {
    let target_os = std::env::var("CARGO_CFG_TARGET_OS").unwrap_or_default();
    if target_os != "windows" {
        println!(
            "cargo:warning=webhost: building for {target_os:?}; the native window and \
             WebView2 host are Windows-only, so only the headless backend is available"
        );
    }

    println!("cargo:rerun-if-changed=build.rs");
}
