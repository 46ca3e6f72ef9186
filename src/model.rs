//! Core entities (§3). Field sets and invariants mirror spec.md exactly;
//! this module adds no new semantics, only the Rust shapes for them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{BimAtlasError, Result};

pub type ProjectId = i64;
pub type BranchId = i64;
pub type RevisionId = i64;

/// Sentinel used only at the graph-store boundary: the property graph has no
/// null properties, so "open" edges/nodes carry `-1` instead of a missing
/// `valid_to_rev`. This must never leak past the Query Layer boundary (§9).
pub const GRAPH_OPEN_SENTINEL: i64 = -1;

/// An IFC `GlobalId`: 22 characters drawn from the IFC base64-ish alphabet
/// plus `_` and `$` (§4.4). Validated on construction so every other module
/// can treat `GlobalId` as already-safe to embed in graph query text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GlobalId(String);

impl GlobalId {
    pub fn new(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        if raw.chars().count() != 22 {
            return Err(BimAtlasError::validation(format!(
                "global_id must be 22 characters, got {}",
                raw.chars().count()
            )));
        }
        if !raw.chars().all(is_global_id_char) {
            return Err(BimAtlasError::validation(
                "global_id contains characters outside the IFC base64 alphabet plus _$",
            ));
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GlobalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn is_global_id_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '$'
}

/// A graph or relationship label: `[A-Za-z][A-Za-z0-9]*` (§4.4).
pub fn validate_label(label: &str) -> Result<()> {
    let mut chars = label.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => {}
        _ => {
            return Err(BimAtlasError::validation(format!(
                "label {label:?} must start with an ASCII letter"
            )))
        }
    }
    if !chars.all(|c| c.is_ascii_alphanumeric()) {
        return Err(BimAtlasError::validation(format!(
            "label {label:?} must match [A-Za-z][A-Za-z0-9]*"
        )));
    }
    Ok(())
}

/// Tagged variant over the IFC class hierarchy relevant to this core
/// (§9 "Dynamic dispatch over IFC entity types"). `Other` keeps the crate
/// forward-compatible with IFC classes this enumeration doesn't name yet.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IfcClass {
    IfcProject,
    IfcSite,
    IfcBuilding,
    IfcBuildingStorey,
    IfcSpace,
    IfcWall,
    IfcWallStandardCase,
    IfcSlab,
    IfcColumn,
    IfcBeam,
    IfcDoor,
    IfcWindow,
    IfcRoof,
    IfcStair,
    IfcStairFlight,
    IfcRailing,
    IfcCovering,
    IfcFurnishingElement,
    IfcPlate,
    IfcMember,
    Other(String),
}

impl IfcClass {
    pub fn as_str(&self) -> &str {
        match self {
            Self::IfcProject => "IfcProject",
            Self::IfcSite => "IfcSite",
            Self::IfcBuilding => "IfcBuilding",
            Self::IfcBuildingStorey => "IfcBuildingStorey",
            Self::IfcSpace => "IfcSpace",
            Self::IfcWall => "IfcWall",
            Self::IfcWallStandardCase => "IfcWallStandardCase",
            Self::IfcSlab => "IfcSlab",
            Self::IfcColumn => "IfcColumn",
            Self::IfcBeam => "IfcBeam",
            Self::IfcDoor => "IfcDoor",
            Self::IfcWindow => "IfcWindow",
            Self::IfcRoof => "IfcRoof",
            Self::IfcStair => "IfcStair",
            Self::IfcStairFlight => "IfcStairFlight",
            Self::IfcRailing => "IfcRailing",
            Self::IfcCovering => "IfcCovering",
            Self::IfcFurnishingElement => "IfcFurnishingElement",
            Self::IfcPlate => "IfcPlate",
            Self::IfcMember => "IfcMember",
            Self::Other(s) => s.as_str(),
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "IfcProject" => Self::IfcProject,
            "IfcSite" => Self::IfcSite,
            "IfcBuilding" => Self::IfcBuilding,
            "IfcBuildingStorey" => Self::IfcBuildingStorey,
            "IfcSpace" => Self::IfcSpace,
            "IfcWall" => Self::IfcWall,
            "IfcWallStandardCase" => Self::IfcWallStandardCase,
            "IfcSlab" => Self::IfcSlab,
            "IfcColumn" => Self::IfcColumn,
            "IfcBeam" => Self::IfcBeam,
            "IfcDoor" => Self::IfcDoor,
            "IfcWindow" => Self::IfcWindow,
            "IfcRoof" => Self::IfcRoof,
            "IfcStair" => Self::IfcStair,
            "IfcStairFlight" => Self::IfcStairFlight,
            "IfcRailing" => Self::IfcRailing,
            "IfcCovering" => Self::IfcCovering,
            "IfcFurnishingElement" => Self::IfcFurnishingElement,
            "IfcPlate" => Self::IfcPlate,
            "IfcMember" => Self::IfcMember,
            other => Self::Other(other.to_string()),
        }
    }

    /// Spatial structure elements (Project/Site/Building/Storey/Space, §3, §4.1).
    pub fn is_spatial(&self) -> bool {
        matches!(
            self,
            Self::IfcProject
                | Self::IfcSite
                | Self::IfcBuilding
                | Self::IfcBuildingStorey
                | Self::IfcSpace
        )
    }

    /// Direct descendants for `ifc_class` filter expansion (§4.5). Minimal
    /// hierarchy sufficient for the classes this crate enumerates; unknown
    /// classes have no descendants beyond themselves.
    pub fn descendants(&self) -> Vec<IfcClass> {
        match self {
            Self::IfcWall => vec![Self::IfcWall, Self::IfcWallStandardCase],
            other => vec![other.clone()],
        }
    }
}

/// IFC relationship entity names relevant to this core (§3).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelationshipKind {
    IfcRelAggregates,
    IfcRelContainedInSpatialStructure,
    IfcRelConnectsElements,
    IfcRelVoidsElement,
    IfcRelFillsElement,
    Other(String),
}

impl RelationshipKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::IfcRelAggregates => "IfcRelAggregates",
            Self::IfcRelContainedInSpatialStructure => "IfcRelContainedInSpatialStructure",
            Self::IfcRelConnectsElements => "IfcRelConnectsElements",
            Self::IfcRelVoidsElement => "IfcRelVoidsElement",
            Self::IfcRelFillsElement => "IfcRelFillsElement",
            Self::Other(s) => s.as_str(),
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "IfcRelAggregates" => Self::IfcRelAggregates,
            "IfcRelContainedInSpatialStructure" => Self::IfcRelContainedInSpatialStructure,
            "IfcRelConnectsElements" => Self::IfcRelConnectsElements,
            "IfcRelVoidsElement" => Self::IfcRelVoidsElement,
            "IfcRelFillsElement" => Self::IfcRelFillsElement,
            other => Self::Other(other.to_string()),
        }
    }
}

/// Tessellated geometry with world-coordinate transforms already applied
/// (§4.1 — "downstream consumers need no transform matrix to render"). The
/// 4x4 `matrix` is retained purely because it is part of the content-hash
/// input (§4.1) and of the persisted row (§3), not because it's needed to
/// interpret `vertices`/`normals`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Mesh {
    pub vertices: Vec<f32>,
    pub normals: Vec<f32>,
    pub faces: Vec<u32>,
    pub matrix: [f32; 16],
}

impl Mesh {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn vertices_bytes(&self) -> Vec<u8> {
        f32_slice_to_le_bytes(&self.vertices)
    }

    pub fn normals_bytes(&self) -> Vec<u8> {
        f32_slice_to_le_bytes(&self.normals)
    }

    pub fn faces_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.faces.len() * 4);
        for f in &self.faces {
            buf.extend_from_slice(&f.to_le_bytes());
        }
        buf
    }

    pub fn matrix_bytes(&self) -> Vec<u8> {
        f32_slice_to_le_bytes(&self.matrix)
    }
}

fn f32_slice_to_le_bytes(xs: &[f32]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(xs.len() * 4);
    for x in xs {
        buf.extend_from_slice(&x.to_le_bytes());
    }
    buf
}

/// Extractor output for one IFC product, before any storage concerns (§4.1).
#[derive(Debug, Clone)]
pub struct ProductRecord {
    pub global_id: GlobalId,
    pub ifc_class: IfcClass,
    pub name: Option<String>,
    pub description: Option<String>,
    pub object_type: Option<String>,
    pub tag: Option<String>,
    pub contained_in: Option<GlobalId>,
    pub mesh: Mesh,
}

/// Extractor output for one IFC relationship (§4.1).
#[derive(Debug, Clone)]
pub struct RelationshipRecord {
    pub from_global_id: GlobalId,
    pub to_global_id: GlobalId,
    pub relationship_type: RelationshipKind,
}

/// A persisted SCD2 product row (§3).
#[derive(Debug, Clone)]
pub struct Product {
    pub surrogate_id: i64,
    pub branch_id: BranchId,
    pub global_id: GlobalId,
    pub ifc_class: IfcClass,
    pub name: Option<String>,
    pub description: Option<String>,
    pub object_type: Option<String>,
    pub tag: Option<String>,
    pub contained_in: Option<GlobalId>,
    pub vertices: Vec<u8>,
    pub normals: Vec<u8>,
    pub faces: Vec<u8>,
    pub matrix: Vec<u8>,
    pub content_hash: String,
    pub valid_from_rev: RevisionId,
    pub valid_to_rev: Option<RevisionId>,
}

impl Product {
    /// Visibility invariant (§3): `valid_from_rev <= r && (valid_to_rev is
    /// null || valid_to_rev > r)`.
    pub fn visible_at(&self, r: RevisionId) -> bool {
        self.valid_from_rev <= r && self.valid_to_rev.map_or(true, |v| v > r)
    }

    pub fn is_open(&self) -> bool {
        self.valid_to_rev.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct Branch {
    pub id: BranchId,
    pub project_id: ProjectId,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct Revision {
    pub id: RevisionId,
    pub branch_id: BranchId,
    pub label: Option<String>,
    pub source_filename: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_id_accepts_the_ifc_alphabet() {
        assert!(GlobalId::new("2O2Fr$t4X7Zf8NOew3FL9r").is_ok());
    }

    #[test]
    fn global_id_rejects_wrong_length() {
        assert!(GlobalId::new("tooShort").is_err());
    }

    #[test]
    fn global_id_rejects_illegal_characters() {
        assert!(GlobalId::new("2O2Fr!t4X7Zf8NOew3FL9r").is_err());
    }

    #[test]
    fn label_rejects_leading_digit() {
        assert!(validate_label("1Wall").is_err());
    }

    #[test]
    fn label_accepts_camel_case() {
        assert!(validate_label("IfcWall").is_ok());
    }

    #[test]
    fn visibility_respects_open_window() {
        let p = Product {
            surrogate_id: 1,
            branch_id: 1,
            global_id: GlobalId::new("2O2Fr$t4X7Zf8NOew3FL9r").unwrap(),
            ifc_class: IfcClass::IfcWall,
            name: None,
            description: None,
            object_type: None,
            tag: None,
            contained_in: None,
            vertices: vec![],
            normals: vec![],
            faces: vec![],
            matrix: vec![],
            content_hash: "h".to_string(),
            valid_from_rev: 2,
            valid_to_rev: None,
        };
        assert!(!p.visible_at(1));
        assert!(p.visible_at(2));
        assert!(p.visible_at(100));
    }

    #[test]
    fn visibility_respects_closed_window() {
        let p = Product {
            surrogate_id: 1,
            branch_id: 1,
            global_id: GlobalId::new("2O2Fr$t4X7Zf8NOew3FL9r").unwrap(),
            ifc_class: IfcClass::IfcWall,
            name: None,
            description: None,
            object_type: None,
            tag: None,
            contained_in: None,
            vertices: vec![],
            normals: vec![],
            faces: vec![],
            matrix: vec![],
            content_hash: "h".to_string(),
            valid_from_rev: 1,
            valid_to_rev: Some(3),
        };
        assert!(!p.visible_at(0));
        assert!(p.visible_at(1));
        assert!(p.visible_at(2));
        assert!(!p.visible_at(3));
    }
}
