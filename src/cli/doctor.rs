//! Environment readiness check.

use anyhow::Result;

use crate::renderer::chromium::find_chromium;

/// Check Chromium availability and images-directory writability.
pub async fn run(images_dir: &std::path::Path) -> Result<()> {
    println!("Palate Doctor");
    println!("=============");
    println!();

    let os = std::env::consts::OS;
    let arch = std::env::consts::ARCH;
    println!("OS:   {os}");
    println!("Arch: {arch}");
    println!();

    let chromium_path = find_chromium();
    match &chromium_path {
        Some(path) => println!("[OK] Chromium found: {}", path.display()),
        None => println!(
            "[!!] Chromium NOT found. Install Chrome or set PALATE_CHROMIUM_PATH."
        ),
    }

    let images_writable = match std::fs::create_dir_all(images_dir) {
        Ok(()) => {
            let probe = images_dir.join(".palate-write-probe");
            let ok = std::fs::write(&probe, b"ok").is_ok();
            let _ = std::fs::remove_file(&probe);
            ok
        }
        Err(_) => false,
    };
    if images_writable {
        println!("[OK] Images directory writable: {}", images_dir.display());
    } else {
        println!("[!!] Images directory NOT writable: {}", images_dir.display());
    }

    println!();
    if chromium_path.is_some() && images_writable {
        println!("Status: READY");
    } else {
        println!("Status: NOT READY");
    }

    Ok(())
}
