/// Execute CPUID on the current CPU
#[cfg(target_arch = "x86_64")]
pub fn cpuid(eax: u32, ecx: u32) -> (u32, u32, u32, u32) {
    let mut ebx: u32;
    let mut edx: u32;
    let mut eax_out = eax;
    let mut ecx_out = ecx;

    unsafe {
        std::arch::asm!(
            "mov {0:r}, rbx",
            "cpuid",
            "xchg {0:r}, rbx",
            out(reg) ebx,
            inout("eax") eax_out,
            inout("ecx") ecx_out,
            out("edx") edx,
            options(nostack, preserves_flags)
        );
    }

    (eax_out, ebx, ecx_out, edx)
}

#[cfg(not(target_arch = "x86_64"))]
pub fn cpuid(_eax: u32, _ecx: u32) -> (u32, u32, u32, u32) {
    (0, 0, 0, 0)
}

/// Processor signature from CPUID leaf 1 EAX
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuSignature {
    pub family: u32,
    pub model: u32,
    pub stepping: u32,
}

impl CpuSignature {
    pub fn from_leaf1(eax: u32) -> Self {
        let base_family = (eax >> 8) & 0xF;
        let base_model = (eax >> 4) & 0xF;
        let family = if base_family == 0xF {
            base_family + ((eax >> 20) & 0xFF)
        } else {
            base_family
        };
        let model = if base_family == 0x6 || base_family == 0xF {
            (((eax >> 16) & 0xF) << 4) | base_model
        } else {
            base_model
        };
        Self {
            family,
            model,
            stepping: eax & 0xF,
        }
    }
}

/// 12-byte vendor identification from CPUID leaf 0
pub fn vendor_string(ebx: u32, ecx: u32, edx: u32) -> String {
    let mut bytes = Vec::with_capacity(12);
    for reg in [ebx, edx, ecx] {
        bytes.extend_from_slice(&reg.to_le_bytes());
    }
    String::from_utf8_lossy(&bytes).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[allow(clippy::similar_names)] // CPU register names are standard
    fn test_cpuid() {
        let (eax, ebx, ecx, edx) = cpuid(0, 0);
        println!("CPUID(0,0): EAX={eax:08X} EBX={ebx:08X} ECX={ecx:08X} EDX={edx:08X}");
    }

    #[test]
    fn test_coffee_lake_signature() {
        // Core i7-8700, CPUID 0x906EA
        let sig = CpuSignature::from_leaf1(0x0009_06EA);
        assert_eq!(sig.family, 6);
        assert_eq!(sig.model, 0x9E);
        assert_eq!(sig.stepping, 0xA);
    }

    #[test]
    fn test_vendor_string() {
        assert_eq!(vendor_string(0x756E_6547, 0x6C65_746E, 0x4965_6E69), "GenuineIntel");
    }
}
