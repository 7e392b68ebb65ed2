use std::path::{Path, PathBuf};
use std::process::{Command, Output};

fn bin() -> String {
    std::env::var("CARGO_BIN_EXE_viewfx").unwrap_or_else(|_| {
        PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("../../target/debug/viewfx")
            .to_string_lossy()
            .to_string()
    })
}

fn run(dir: &Path, args: &[&str]) -> Output {
    let output = Command::new(bin())
        .current_dir(dir)
        .env("RUST_LOG", "warn")
        .args(args)
        .output()
        .expect("failed to spawn viewfx");
    assert!(
        output.status.success(),
        "viewfx {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    output
}

fn solid_png(path: &Path, rgba: [u8; 4]) {
    image::RgbaImage::from_pixel(8, 6, image::Rgba(rgba))
        .save(path)
        .expect("write test image");
}

#[test]
fn test_mix_writes_weighted_blend() {
    let dir = tempfile::tempdir().unwrap();
    solid_png(&dir.path().join("left.png"), [200, 100, 50, 255]);
    solid_png(&dir.path().join("right.png"), [0, 0, 0, 255]);

    run(
        dir.path(),
        &["mix", "left.png", "right.png", "-o", "out.png", "-w", "0.25", "--depth", "u8"],
    );
    let out = image::open(dir.path().join("out.png")).unwrap().to_rgba8();
    assert!(out.pixels().all(|p| p.0 == [150, 75, 38, 255]));
}

#[test]
fn test_zero_displacement_warp_keeps_the_image() {
    let dir = tempfile::tempdir().unwrap();
    let input = image::RgbaImage::from_fn(8, 6, |x, y| image::Rgba([(x * 30) as u8, (y * 40) as u8, 7, 255]));
    input.save(dir.path().join("in.png")).unwrap();

    run(
        dir.path(),
        &["warp", "in.png", "-o", "out.png", "--from", "3,2", "--to", "3,2", "--driver", "reference"],
    );
    let out = image::open(dir.path().join("out.png")).unwrap().to_rgba8();
    assert_eq!(out, input);
}

#[test]
fn test_info_json_lists_backends() {
    let dir = tempfile::tempdir().unwrap();
    let output = run(dir.path(), &["info", "--json"]);
    let value: serde_json::Value = serde_json::from_slice(&output.stdout).expect("info output is JSON");
    assert!(value["backends"]
        .as_array()
        .unwrap()
        .iter()
        .any(|b| b == "software"));
    assert_eq!(value["default_cpu_driver"], "threaded");
    assert!(value.get("gpu").is_none());
}

#[test]
fn test_config_file_is_picked_up_and_written() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("viewfx.toml"),
        "[render]\ncpu_driver = \"reference\"\nbands = 2\n",
    )
    .unwrap();

    let output = run(dir.path(), &["config", "--write", "copy.toml"]);
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.contains("cpu_driver = \"reference\""));

    let copy = viewfx_core::ViewFxConfig::load_from_file(&dir.path().join("copy.toml")).unwrap();
    assert_eq!(copy.render.cpu_driver, "reference");
    assert_eq!(copy.render.bands, Some(2));
}
