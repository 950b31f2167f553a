// Shader module loading
//
// Shaders ship as SPIR-V files next to the executable's working directory
// (compiled by build.rs when glslc is available). They are read once at
// startup and thrown away as soon as the pipeline exists.

use super::VulkanDevice;
use anyhow::{Context, Result};
use ash::vk;
use std::io::Cursor;
use std::path::Path;

const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Decode a SPIR-V blob into words.
///
/// `ash::util::read_spv` takes care of alignment and byte order; on top of
/// that we reject anything that does not start with the SPIR-V magic.
pub fn decode_spirv(bytes: &[u8]) -> Result<Vec<u32>> {
    let words = ash::util::read_spv(&mut Cursor::new(bytes)).context("Malformed SPIR-V")?;

    match words.first() {
        Some(&SPIRV_MAGIC) => Ok(words),
        Some(&other) => anyhow::bail!("Not a SPIR-V module (magic {:#010x})", other),
        None => anyhow::bail!("Empty SPIR-V module"),
    }
}

/// Read a SPIR-V file and create a shader module from it
pub fn load_shader_module(device: &VulkanDevice, path: &Path) -> Result<vk::ShaderModule> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read shader {:?}", path))?;
    let code = decode_spirv(&bytes).with_context(|| format!("Invalid shader {:?}", path))?;

    log::debug!("Loaded shader {:?} ({} bytes)", path, bytes.len());

    create_shader_module(device, &code)
}

pub fn create_shader_module(device: &VulkanDevice, code: &[u32]) -> Result<vk::ShaderModule> {
    let create_info = vk::ShaderModuleCreateInfo::builder().code(code);

    unsafe {
        device
            .device
            .create_shader_module(&create_info, None)
            .context("Failed to create shader module")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words_to_bytes(words: &[u32]) -> Vec<u8> {
        words.iter().flat_map(|w| w.to_le_bytes()).collect()
    }

    #[test]
    fn decodes_little_endian_module() {
        let bytes = words_to_bytes(&[SPIRV_MAGIC, 0x0001_0000, 0, 1, 0]);
        let words = decode_spirv(&bytes).unwrap();
        assert_eq!(words.len(), 5);
        assert_eq!(words[1], 0x0001_0000);
    }

    #[test]
    fn decodes_big_endian_module() {
        let bytes: Vec<u8> = [SPIRV_MAGIC, 0x0001_0000]
            .iter()
            .flat_map(|w| w.to_be_bytes())
            .collect();
        let words = decode_spirv(&bytes).unwrap();
        assert_eq!(words, vec![SPIRV_MAGIC, 0x0001_0000]);
    }

    #[test]
    fn rejects_truncated_module() {
        let mut bytes = words_to_bytes(&[SPIRV_MAGIC, 1]);
        bytes.pop();
        assert!(decode_spirv(&bytes).is_err());
    }

    #[test]
    fn rejects_non_spirv_data() {
        assert!(decode_spirv(b"#version 450\n\0\0\0").is_err());
        assert!(decode_spirv(&[]).is_err());
    }
}
