use std::env;
use std::path::{Path, PathBuf};

fn main() {
    println!("cargo:rerun-if-env-changed=PYHOST_PYTHON_LIB_DIR");
    println!("cargo:rerun-if-env-changed=PYO3_PYTHON");

    let Some(lib_dir) = env::var_os("PYHOST_PYTHON_LIB_DIR").map(PathBuf::from) else {
        return;
    };
    if !lib_dir.is_dir() {
        println!(
            "cargo:warning=PYHOST_PYTHON_LIB_DIR={} is not a directory, using the default libpython",
            lib_dir.display()
        );
        return;
    }

    let target = env::var("TARGET").unwrap_or_default();
    if let Some(lib_file) = find_python_lib(&lib_dir) {
        println!("cargo:rustc-link-search=native={}", lib_dir.display());
        println!("cargo:rerun-if-changed={}", lib_file.display());
        add_rpath(&target, &lib_dir);
    } else {
        println!(
            "cargo:warning=no libpython found in {}, using the default libpython",
            lib_dir.display()
        );
    }
}

fn find_python_lib(dir: &Path) -> Option<PathBuf> {
    let entries = dir.read_dir().ok()?;
    entries.flatten().map(|entry| entry.path()).find(|path| {
        let Some(name) = path.file_name().and_then(|s| s.to_str()) else {
            return false;
        };
        path.is_file()
            && ((name.starts_with("libpython")
                && (name.ends_with(".dylib") || name.contains(".so")))
                || (name.starts_with("python") && name.ends_with(".dll")))
    })
}

fn add_rpath(target: &str, lib_dir: &Path) {
    if target.contains("apple-darwin") || target.contains("linux") {
        println!("cargo:rustc-link-arg=-Wl,-rpath,{}", lib_dir.display());
    }
}
