//! Build script: compiles the search kernels (.cu) to PTX at build time.
//!
//! When the `cuda` feature is enabled, this script finds all `.cu` files in
//! `kernels/`, invokes `nvcc --ptx` for each, and writes the resulting `.ptx`
//! files to `$OUT_DIR/kernels/`. The Rust source then loads them via
//! `include_str!(concat!(env!("OUT_DIR"), "/kernels/<name>.ptx"))`.

fn main() {
    #[cfg(feature = "cuda")]
    cuda::compile_kernels();
}

#[cfg(feature = "cuda")]
mod cuda {
    use std::path::{Path, PathBuf};
    use std::process::Command;
    use std::{env, fs};

    pub fn compile_kernels() {
        let manifest_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap());
        let kernel_dir = manifest_dir.join("kernels");
        let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap());
        let ptx_dir = out_dir.join("kernels");

        fs::create_dir_all(&ptx_dir).expect("Failed to create PTX output directory");
        println!("cargo:rerun-if-changed={}", kernel_dir.display());

        let mut cu_files: Vec<PathBuf> = fs::read_dir(&kernel_dir)
            .expect("Failed to read kernels/ directory")
            .filter_map(|entry| {
                let path = entry.ok()?.path();
                path.extension().is_some_and(|ext| ext == "cu").then_some(path)
            })
            .collect();
        cu_files.sort();

        assert!(
            !cu_files.is_empty(),
            "No .cu files found in {}",
            kernel_dir.display()
        );

        let arch = env::var("BEAMLINE_CUDA_ARCH").ok();
        println!("cargo:rerun-if-env-changed=BEAMLINE_CUDA_ARCH");

        for cu_path in &cu_files {
            compile_cu(&ptx_dir, cu_path, arch.as_deref());
        }
    }

    fn compile_cu(ptx_dir: &Path, cu_path: &Path, arch: Option<&str>) {
        let stem = cu_path.file_stem().unwrap().to_str().unwrap();
        let ptx_path = ptx_dir.join(format!("{stem}.ptx"));

        println!("cargo:rerun-if-changed={}", cu_path.display());

        let mut cmd = Command::new("nvcc");
        cmd.args(["--ptx", "-O3", "-o", ptx_path.to_str().unwrap()]);
        if let Some(arch) = arch {
            cmd.arg(format!("-arch={arch}"));
        }
        cmd.arg(cu_path);

        let status = cmd
            .status()
            .expect("Failed to execute nvcc. Is the CUDA toolkit installed?");

        assert!(
            status.success(),
            "nvcc failed to compile {}",
            cu_path.display()
        );
    }
}
