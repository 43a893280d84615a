//! Identifies the CPU a microcode blob has to match.

use std::fmt;
use std::str::FromStr;

use raw_cpuid::{CpuId, CpuIdReader};

use crate::error::{Error, Result};

/// Processor vendors the kernel loads early microcode for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vendor {
    Intel,
    Amd,
}

impl Vendor {
    /// Parses the CPUID vendor identification string.
    pub fn from_vendor_id(id: &str) -> Result<Vendor> {
        match id {
            "GenuineIntel" => Ok(Vendor::Intel),
            "AuthenticAMD" => Ok(Vendor::Amd),
            other => Err(Error::UnsupportedVendor(other.to_owned())),
        }
    }

    pub fn vendor_id(self) -> &'static str {
        match self {
            Vendor::Intel => "GenuineIntel",
            Vendor::Amd => "AuthenticAMD",
        }
    }
}

impl fmt::Display for Vendor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.vendor_id())
    }
}

/// Vendor plus the display family, model and stepping of a processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signature {
    pub vendor: Vendor,
    pub family: u32,
    pub model: u32,
    pub stepping: u32,
}

impl Signature {
    /// Reads the signature through any CPUID source.
    pub fn from_cpuid<R: CpuIdReader>(cpuid: &CpuId<R>) -> Result<Signature> {
        let vendor = match cpuid.get_vendor_info() {
            Some(info) => Vendor::from_vendor_id(info.as_str())?,
            None => return Err(Error::UnsupportedVendor("<unknown>".to_owned())),
        };
        let info = cpuid.get_feature_info().ok_or(Error::MissingFeatureInfo)?;

        // extended family only counts when the base family is 0xF
        let base_family = u32::from(info.base_family_id());
        let family = if base_family == 0xF {
            base_family + u32::from(info.extended_family_id())
        } else {
            base_family
        };
        let model = if base_family == 0x6 || base_family == 0xF {
            (u32::from(info.extended_model_id()) << 4) | u32::from(info.base_model_id())
        } else {
            u32::from(info.base_model_id())
        };

        Ok(Signature {
            vendor,
            family,
            model,
            stepping: u32::from(info.stepping_id()),
        })
    }
}

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
pub fn detect() -> Result<Signature> {
    Signature::from_cpuid(&CpuId::new())
}

#[cfg(not(any(target_arch = "x86", target_arch = "x86_64")))]
pub fn detect() -> Result<Signature> {
    Err(Error::UnsupportedArch)
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} family {:#x} model {:#x} stepping {:#x}",
            self.vendor, self.family, self.model, self.stepping
        )
    }
}

/// Parses `intel:06-8e-0a` style signatures (hex fields, same shape as the
/// Intel microcode file names).
impl FromStr for Signature {
    type Err = Error;

    fn from_str(s: &str) -> Result<Signature> {
        let invalid = || Error::InvalidSignature(s.to_owned());

        let (vendor, rest) = s.split_once(':').ok_or_else(invalid)?;
        let vendor = match vendor.to_ascii_lowercase().as_str() {
            "intel" | "genuineintel" => Vendor::Intel,
            "amd" | "authenticamd" => Vendor::Amd,
            _ => return Err(invalid()),
        };

        let mut fields = rest.split('-').map(|f| u32::from_str_radix(f, 16));
        match (fields.next(), fields.next(), fields.next(), fields.next()) {
            (Some(Ok(family)), Some(Ok(model)), Some(Ok(stepping)), None) => Ok(Signature {
                vendor,
                family,
                model,
                stepping,
            }),
            _ => Err(invalid()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use raw_cpuid::CpuIdResult;

    fn fake_cpuid(vendor: &'static [u8; 12], leaf1_eax: u32) -> CpuId<impl CpuIdReader> {
        CpuId::with_cpuid_reader(move |leaf: u32, _subleaf: u32| {
            let word = |i: usize| {
                u32::from_le_bytes([vendor[i], vendor[i + 1], vendor[i + 2], vendor[i + 3]])
            };
            match leaf {
                0 => CpuIdResult {
                    eax: 1,
                    ebx: word(0),
                    edx: word(4),
                    ecx: word(8),
                },
                1 => CpuIdResult {
                    eax: leaf1_eax,
                    ebx: 0,
                    ecx: 0,
                    edx: 0,
                },
                _ => CpuIdResult {
                    eax: 0,
                    ebx: 0,
                    ecx: 0,
                    edx: 0,
                },
            }
        })
    }

    #[test]
    fn intel_family_six_uses_extended_model() {
        // Kaby Lake: family 6, model 0x8e, stepping 0xa
        let sig = Signature::from_cpuid(&fake_cpuid(b"GenuineIntel", 0x0008_06ea)).unwrap();
        assert_eq!(
            sig,
            Signature {
                vendor: Vendor::Intel,
                family: 0x6,
                model: 0x8e,
                stepping: 0xa,
            }
        );
    }

    #[test]
    fn amd_family_f_adds_extended_family() {
        // Zen 3: family 0x19, model 0x21, stepping 0
        let sig = Signature::from_cpuid(&fake_cpuid(b"AuthenticAMD", 0x00a2_0f10)).unwrap();
        assert_eq!(sig.vendor, Vendor::Amd);
        assert_eq!(sig.family, 0x19);
        assert_eq!(sig.model, 0x21);
        assert_eq!(sig.stepping, 0);
    }

    #[test]
    fn extended_model_ignored_below_family_six() {
        let sig = Signature::from_cpuid(&fake_cpuid(b"AuthenticAMD", 0x0001_0523)).unwrap();
        assert_eq!(sig.family, 0x5);
        assert_eq!(sig.model, 0x2);
        assert_eq!(sig.stepping, 0x3);
    }

    #[test]
    fn unknown_vendor_is_rejected() {
        let err = Signature::from_cpuid(&fake_cpuid(b"HygonGenuine", 0x0090_0f01)).unwrap_err();
        assert_eq!(
            err.to_string(),
            "unable to find microcode for processor vendor HygonGenuine"
        );
    }

    #[test]
    fn parse_signature() {
        let sig: Signature = "intel:06-8e-0a".parse().unwrap();
        assert_eq!(sig.vendor, Vendor::Intel);
        assert_eq!((sig.family, sig.model, sig.stepping), (0x6, 0x8e, 0xa));

        let sig: Signature = "AuthenticAMD:19-21-0".parse().unwrap();
        assert_eq!(sig.vendor, Vendor::Amd);
        assert_eq!(sig.family, 0x19);

        assert!("intel:06-8e".parse::<Signature>().is_err());
        assert!("intel:06-8e-0a-01".parse::<Signature>().is_err());
        assert!("via:06-0f-01".parse::<Signature>().is_err());
        assert!("06-8e-0a".parse::<Signature>().is_err());
        assert!("intel:zz-8e-0a".parse::<Signature>().is_err());
    }
}
