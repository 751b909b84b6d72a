//! Data block and side block catalogs for the `dataBlocks` endpoint.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

use crate::error::DirectPlusError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DataBlock {
    pub name: &'static str,
    pub version: u8,
    pub min_level: u8,
    pub max_level: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SideBlock {
    pub name: &'static str,
    pub version: u8,
}

const fn block(name: &'static str, version: u8, min_level: u8, max_level: u8) -> DataBlock {
    DataBlock {
        name,
        version,
        min_level,
        max_level,
    }
}

pub const DATA_BLOCKS: &[DataBlock] = &[
    block("businessactivityinsight", 1, 1, 3),
    block("companyfinancials", 3, 1, 4),
    block("companyinfo", 1, 1, 4),
    block("diversityinsight", 1, 1, 3),
    block("dtri", 1, 1, 3),
    block("educationaldata", 1, 1, 2),
    block("esginsight", 1, 3, 3),
    block("eventfilings", 1, 1, 3),
    block("externaldisruptioninsight", 1, 1, 4),
    block("financialstrengthinsight", 1, 1, 4),
    block("globalbusinessranking", 1, 1, 1),
    block("globalfinancials", 1, 1, 2),
    block("hierarchyconnections", 1, 1, 1),
    block("inquiryinsight", 1, 1, 4),
    block("ownershipinsight", 1, 1, 1),
    block("paymentinsight", 1, 1, 4),
    block("principalscontacts", 2, 1, 4),
    block("salesmarketinginsight", 2, 1, 3),
    block("shippinginsight", 1, 1, 1),
    block("supplychainriskindex", 1, 1, 1),
    block("thirdpartyriskinsight", 3, 1, 1),
];

pub const SIDE_BLOCKS: &[SideBlock] = &[
    SideBlock { name: "companyfinancials_abridged", version: 1 },
    SideBlock { name: "companyfinancials_thirdparty", version: 1 },
    SideBlock { name: "salesmarketinginsight_foottraffic", version: 1 },
    SideBlock { name: "hierarchyconnections_alternative", version: 1 },
    SideBlock { name: "hierarchyconnections_eli", version: 1 },
    SideBlock { name: "companyinfo_advgeoposition", version: 1 },
];

impl DataBlock {
    pub fn find(name: &str) -> Option<&'static DataBlock> {
        DATA_BLOCKS.iter().find(|b| b.name.eq_ignore_ascii_case(name))
    }

    /// Block id at `level`, or at the lowest level when `None`.
    pub fn block_id(&self, level: Option<u8>) -> Result<String, DirectPlusError> {
        let level = level.unwrap_or(self.min_level);
        if !(self.min_level..=self.max_level).contains(&level) {
            return Err(DirectPlusError::InvalidArgument(format!(
                "Level {level} is out of range for {} (levels {}-{}).",
                self.name, self.min_level, self.max_level
            )));
        }
        Ok(format!("{}_L{level}_v{}", self.name, self.version))
    }
}

impl SideBlock {
    pub fn find(name: &str) -> Option<&'static SideBlock> {
        SIDE_BLOCKS.iter().find(|b| b.name.eq_ignore_ascii_case(name))
    }

    pub fn block_id(&self) -> String {
        format!("{}_v{}", self.name, self.version)
    }
}

/// A block request resolved against the catalogs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockRequest {
    Data { block: &'static DataBlock, level: u8 },
    Side(&'static SideBlock),
}

impl BlockRequest {
    pub fn block_id(&self) -> String {
        match self {
            Self::Data { block, level } => format!("{}_L{level}_v{}", block.name, block.version),
            Self::Side(block) => block.block_id(),
        }
    }
}

impl fmt::Display for BlockRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.block_id())
    }
}

fn block_id_re() -> &'static Regex {
    static BLOCK_ID_RE: OnceLock<Regex> = OnceLock::new();
    BLOCK_ID_RE.get_or_init(|| {
        Regex::new(r"^(?i)([a-z_]+?)(?:_L(\d+))?(?:_v(\d+))?$").expect("valid regex")
    })
}

/// Parses `companyinfo`, `companyinfo:2`, `companyinfo_L2_v1`, or a side
/// block name such as `companyfinancials_abridged_v1`.
pub fn parse_block(raw: &str) -> Result<BlockRequest, DirectPlusError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(DirectPlusError::InvalidArgument(
            "Block name must not be empty.".into(),
        ));
    }

    let (name, level, version) = match raw.split_once(':') {
        Some((name, level)) => {
            let level = level.trim().parse::<u8>().map_err(|_| {
                DirectPlusError::InvalidArgument(format!("Invalid block level in '{raw}'."))
            })?;
            (name.trim().to_string(), Some(level), None)
        }
        None => {
            let caps = block_id_re().captures(raw).ok_or_else(|| unknown_block(raw))?;
            let level = caps.get(2).and_then(|m| m.as_str().parse::<u8>().ok());
            let version = caps.get(3).and_then(|m| m.as_str().parse::<u8>().ok());
            (caps[1].to_string(), level, version)
        }
    };

    if let Some(side) = SideBlock::find(&name) {
        if level.is_some() {
            return Err(DirectPlusError::InvalidArgument(format!(
                "Side block {} has no levels.",
                side.name
            )));
        }
        check_version(raw, side.version, version)?;
        return Ok(BlockRequest::Side(side));
    }

    let block = DataBlock::find(&name).ok_or_else(|| unknown_block(raw))?;
    check_version(raw, block.version, version)?;
    let level = level.unwrap_or(block.min_level);
    block.block_id(Some(level))?;
    Ok(BlockRequest::Data { block, level })
}

/// Comma separated `blockIDs` value for a list of requests.
pub fn block_ids(requests: &[BlockRequest]) -> String {
    requests
        .iter()
        .map(BlockRequest::block_id)
        .collect::<Vec<_>>()
        .join(",")
}

fn check_version(raw: &str, expected: u8, given: Option<u8>) -> Result<(), DirectPlusError> {
    match given {
        Some(given) if given != expected => Err(DirectPlusError::InvalidArgument(format!(
            "Block '{raw}' asks for version {given}; the catalog has version {expected}."
        ))),
        _ => Ok(()),
    }
}

fn unknown_block(raw: &str) -> DirectPlusError {
    let known = DATA_BLOCKS
        .iter()
        .map(|b| b.name)
        .chain(SIDE_BLOCKS.iter().map(|b| b.name))
        .collect::<Vec<_>>()
        .join(", ");
    DirectPlusError::InvalidArgument(format!("Unknown block '{raw}'. Known blocks: {known}"))
}
