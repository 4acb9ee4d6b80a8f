use color_eyre::Result;
use color_eyre::eyre::OptionExt;
use naga::{
    back::spv, front::glsl::{Frontend, Options},
    valid::{Capabilities, ValidationFlags, Validator},
    ShaderStage
};
use std::{env, fs, path::Path};

fn main() -> Result<()> {
    println!("cargo:rerun-if-changed=kernels");

    compile_kernels()?;

    Ok(())
}

/// Compiles every GLSL compute kernel in `kernels/` to SPIR-V in `kernels-built/`.
fn compile_kernels() -> Result<()> {
    let cargo_manifest_dir = env::var("CARGO_MANIFEST_DIR")?;
    let kernels_in_dir = Path::new(&cargo_manifest_dir).join("kernels");
    let kernels_out_dir = Path::new(&cargo_manifest_dir).join("kernels-built");
    if !kernels_in_dir.is_dir() {
        return Ok(());
    }

    for entry in fs::read_dir(kernels_in_dir)? {
        let entry = entry?;
        let path = entry.path();

        if path.extension().and_then(|ext| ext.to_str()) != Some("comp") {
            println!("cargo:warning=Skipping non-compute kernel file: {:?}", path);
            continue;
        }

        // Read the GLSL file and parse into IR
        let source = fs::read_to_string(&path)?;
        let mut frontend = Frontend::default();
        let module = frontend.parse(&Options::from(ShaderStage::Compute), &source)?;

        let mut validator = Validator::new(ValidationFlags::all(), Capabilities::all());
        let validation_info = validator.validate(&module)?;

        let spv_binary = spv::write_vec(&module, &validation_info, &spv::Options::default(), None)?;

        let kernel_name = path
            .file_stem()
            .ok_or_eyre("Kernel file has no name")?
            .to_str()
            .ok_or_eyre("Kernel file name is not valid UTF-8")?;
        let output_filepath = kernels_out_dir.join(format!("{}.spv", kernel_name));
        fs::create_dir_all(&kernels_out_dir)?;
        fs::write(output_filepath, bytemuck::cast_slice(&spv_binary))?;
    }

    Ok(())
}
