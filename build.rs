use std::env;
use std::fs;
use std::path::{Path, PathBuf};

fn main() {
    // Only run if feature is enabled
    if std::env::var("CARGO_FEATURE_MESHTASTIC_PROTO").is_err() {
        return;
    }

    // Vendored protoc so builds do not depend on a system protobuf install.
    if let Ok(path) = protoc_bin_vendored::protoc_bin_path() {
        std::env::set_var("PROTOC", &path);
    }

    println!("cargo:rerun-if-env-changed=MESHTASTIC_PROTO_DIR");
    println!("cargo:rerun-if-changed=protos");

    // `protos` holds a `meshtastic/` package directory; imports are written as
    // `meshtastic/<file>.proto`, so the include root is the parent of that directory.
    let proto_root = PathBuf::from(env::var("MESHTASTIC_PROTO_DIR").unwrap_or_else(|_| "protos".into()));

    fn collect_protos(dir: &Path, acc: &mut Vec<PathBuf>) {
        if let Ok(entries) = fs::read_dir(dir) {
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_dir() {
                    collect_protos(&path, acc);
                } else if path.extension().and_then(|e| e.to_str()) == Some("proto") {
                    acc.push(path);
                }
            }
        }
    }

    let mut protos = Vec::new();
    collect_protos(&proto_root, &mut protos);
    protos.sort();
    protos.dedup();

    if protos.is_empty() {
        panic!(
            "No Meshtastic .proto files found under '{}'. Set MESHTASTIC_PROTO_DIR to a directory containing meshtastic/*.proto",
            proto_root.display()
        );
    }

    let include_root = if proto_root.file_name().and_then(|n| n.to_str()) == Some("meshtastic") {
        proto_root
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| proto_root.clone())
    } else {
        proto_root.clone()
    };

    eprintln!(
        "build.rs: compiling {} proto files (include root {})",
        protos.len(),
        include_root.display()
    );

    let mut config = prost_build::Config::new();
    config.bytes(["."]);
    config
        .compile_protos(&protos, &[include_root])
        .expect("Failed to compile protos");
}
