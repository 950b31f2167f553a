// Build script to compile GLSL shaders to SPIR-V

use std::path::Path;
use std::process::Command;

const SHADERS: &[(&str, &str)] = &[
    ("shaders/mesh.vert", "shaders/mesh.vert.spv"),
    ("shaders/mesh.frag", "shaders/mesh.frag.spv"),
];

fn main() {
    println!("cargo:rerun-if-changed=shaders/");

    // glslc ships with the Vulkan SDK
    for (input, output) in SHADERS {
        println!("cargo:rerun-if-changed={}", input);
        compile_shader(input, output);
    }
}

fn compile_shader(input: &str, output: &str) {
    let result = Command::new("glslc")
        .arg(Path::new(input))
        .arg("-o")
        .arg(Path::new(output))
        .status();

    match result {
        Ok(status) if status.success() => {}
        Ok(status) => {
            panic!("Failed to compile {}: exit code {:?}", input, status.code());
        }
        Err(e) => {
            println!("cargo:warning=glslc not found ({}), {} was not compiled", e, input);
            println!("cargo:warning=compile manually: glslc {} -o {}", input, output);
        }
    }
}
