#![cfg(feature = "cli")]

use std::path::{Path, PathBuf};

use exr_layers::io::SampleSlice;
use exr_layers::io::openexr::write_part;
use exr_layers::{Header, MemoryImage, PixelType};

fn exe() -> PathBuf {
    std::env::var_os("CARGO_BIN_EXE_exr-layers")
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            let mut p = PathBuf::from("target").join("debug");
            p.push(if cfg!(windows) {
                "exr-layers.exe"
            } else {
                "exr-layers"
            });
            p
        })
}

fn write_fixture(path: &Path) {
    let mut header = Header::with_size(4, 4);
    for name in ["R", "G", "B", "A", "Z"] {
        header.insert_channel(name, PixelType::Half);
    }
    let mut img = MemoryImage::new();
    let p = img.add_part(header);
    img.set_samples(p, "R", SampleSlice::Float(&[0.5; 16])).unwrap();
    img.set_samples(p, "A", SampleSlice::Float(&[1.0; 16])).unwrap();
    img.set_samples(p, "Z", SampleSlice::Float(&[3.0; 16])).unwrap();
    write_part(path, &img, 0).unwrap();
}

#[test]
fn cli_inspect_and_extract() {
    let dir = PathBuf::from("target").join("cli_smoke");
    std::fs::create_dir_all(&dir).unwrap();
    let exr_path = dir.join("beauty.exr");
    let png_path = dir.join("beauty.png");
    let _ = std::fs::remove_file(&png_path);
    write_fixture(&exr_path);

    let in_arg = exr_path.to_string_lossy().to_string();
    let out_arg = png_path.to_string_lossy().to_string();

    let output = std::process::Command::new(exe())
        .args(["inspect", "--in", in_arg.as_str(), "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let summary: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(summary["width"], 4);
    assert_eq!(summary["main_layer"], "RGBA");
    let names: Vec<_> = summary["layers"]
        .as_array()
        .unwrap()
        .iter()
        .map(|l| l["name"].as_str().unwrap().to_owned())
        .collect();
    assert_eq!(names, vec!["[Z]", "RGBA"]);

    let status = std::process::Command::new(exe())
        .args(["extract", "--in", in_arg.as_str(), "--out"])
        .arg(out_arg.as_str())
        .status()
        .unwrap();
    assert!(status.success());
    let png = image::open(&png_path).unwrap();
    assert_eq!((png.width(), png.height()), (4, 4));
}
