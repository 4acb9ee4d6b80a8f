//! Binary binding layout: `b"RLAY"`, version, parameter count, then one kind code per
//! parameter. All integers are little-endian `u32`.

use crate::replayer::error::ReplayError;

const MAGIC: &[u8; 4] = b"RLAY";
const VERSION: u32 = 1;

/// Push-constant bytes owned by each root parameter.
pub const ROOT_PARAMETER_SIZE: u32 = 8;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum TableKind {
    Resources,
    Samplers,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum RootViewKind {
    ShaderResource,
    UnorderedAccess,
    ConstantBuffer,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ParameterKind {
    Table(TableKind),
    Root(RootViewKind),
}

impl ParameterKind {
    fn from_code(code: u32) -> Option<Self> {
        Some(match code {
            0 => Self::Table(TableKind::Resources),
            1 => Self::Table(TableKind::Samplers),
            2 => Self::Root(RootViewKind::ShaderResource),
            3 => Self::Root(RootViewKind::UnorderedAccess),
            4 => Self::Root(RootViewKind::ConstantBuffer),
            _ => return None,
        })
    }

    /// Parses the `type` token of a declared root parameter.
    pub fn from_token(token: &str) -> Option<Self> {
        Some(match token {
            "ResourceTable" => Self::Table(TableKind::Resources),
            "SamplerTable" => Self::Table(TableKind::Samplers),
            "SRV" => Self::Root(RootViewKind::ShaderResource),
            "UAV" => Self::Root(RootViewKind::UnorderedAccess),
            "CBV" => Self::Root(RootViewKind::ConstantBuffer),
            _ => return None,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BindingLayout {
    pub parameters: Vec<ParameterKind>,
}

impl BindingLayout {
    pub fn parse(blob: &[u8]) -> Result<Self, ReplayError> {
        let malformed = |message: String| ReplayError::config("binding layout", message);

        let mut words = blob.get(4..).unwrap_or_default().chunks_exact(4).map(|chunk| {
            u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]])
        });

        if blob.get(..4) != Some(MAGIC.as_slice()) {
            return Err(malformed("bad magic".to_string()));
        }
        let version = words.next().ok_or_else(|| malformed("truncated header".to_string()))?;
        if version != VERSION {
            return Err(malformed(format!("unsupported version {}", version)));
        }
        let count = words.next().ok_or_else(|| malformed("truncated header".to_string()))?;

        let parameters = (0..count)
            .map(|i| {
                let code = words
                    .next()
                    .ok_or_else(|| malformed(format!("expected {} parameters, found {}", count, i)))?;
                ParameterKind::from_code(code)
                    .ok_or_else(|| malformed(format!("unknown kind {} for parameter {}", code, i)))
            })
            .collect::<Result<Vec<_>, _>>()?;

        if (blob.len() - 4) % 4 != 0 || words.next().is_some() {
            log::warn!("Binding layout has trailing bytes after {} parameters", count);
        }

        Ok(Self { parameters })
    }

    pub fn push_constant_size(&self) -> u32 {
        self.parameters.len() as u32 * ROOT_PARAMETER_SIZE
    }

    pub fn kind(&self, index: u32) -> Option<ParameterKind> {
        self.parameters.get(index as usize).copied()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut blob = MAGIC.to_vec();
        blob.extend_from_slice(&VERSION.to_le_bytes());
        blob.extend_from_slice(&(self.parameters.len() as u32).to_le_bytes());
        for kind in &self.parameters {
            let code: u32 = match kind {
                ParameterKind::Table(TableKind::Resources) => 0,
                ParameterKind::Table(TableKind::Samplers) => 1,
                ParameterKind::Root(RootViewKind::ShaderResource) => 2,
                ParameterKind::Root(RootViewKind::UnorderedAccess) => 3,
                ParameterKind::Root(RootViewKind::ConstantBuffer) => 4,
            };
            blob.extend_from_slice(&code.to_le_bytes());
        }
        blob
    }
}
