//! Extractor (§4.1): parses an IFC file into `ProductRecord`/`RelationshipRecord`
//! sequences without touching storage. Geometry tessellation is delegated to
//! a `TessellationEngine` implementation — the real geometry engine is an
//! external collaborator (§1), so this crate only depends on its contract.

mod hash;
mod step;

use std::collections::HashMap;
use std::path::Path;

pub use hash::content_hash;
pub use step::{StepModel, StepValue};

use crate::error::{BimAtlasError, Result};
use crate::model::{GlobalId, IfcClass, Mesh, ProductRecord, RelationshipKind, RelationshipRecord};

/// Severity of a non-fatal extraction finding (§4.1, supplemented — not
/// present in the distilled spec's narrower contract, but required by its
/// own "not dropped, noted in diagnostics" language).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
}

#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    pub code: &'static str,
    pub message: String,
    pub global_id: Option<GlobalId>,
}

#[derive(Debug, Clone, Default)]
pub struct Diagnostics(pub Vec<Diagnostic>);

impl Diagnostics {
    pub fn record(&mut self, severity: Severity, code: &'static str, message: impl Into<String>, global_id: Option<GlobalId>) {
        self.0.push(Diagnostic {
            severity,
            code,
            message: message.into(),
            global_id,
        });
    }
}

#[derive(Debug, Clone)]
pub struct TessellationError(pub String);

impl std::fmt::Display for TessellationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Contract with the (out-of-scope) geometry tessellator: yields a mesh with
/// world-coordinate transforms already baked in, or fails for one element
/// without failing the whole extraction (§4.1).
pub trait TessellationEngine: Send + Sync {
    fn tessellate(&self, global_id: &GlobalId, ifc_class: &IfcClass) -> std::result::Result<Mesh, TessellationError>;
}

/// A tessellator that always succeeds with an empty mesh — useful for tests
/// and for deployments that only need attribute/topology data.
pub struct NullTessellator;

impl TessellationEngine for NullTessellator {
    fn tessellate(&self, _global_id: &GlobalId, _ifc_class: &IfcClass) -> std::result::Result<Mesh, TessellationError> {
        Ok(Mesh::empty())
    }
}

pub struct ExtractionOutput {
    pub products: Vec<ProductRecord>,
    pub relationships: Vec<RelationshipRecord>,
    pub diagnostics: Diagnostics,
}

/// Parse `path` and tessellate every physical element, returning the two
/// lazy-in-spirit (here: materialized — the file is already fully read)
/// sequences described by §4.1.
pub fn extract(path: &Path, tessellator: &dyn TessellationEngine) -> Result<ExtractionOutput> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| BimAtlasError::Extraction(format!("cannot read {}: {e}", path.display())))?;
    extract_str(&text, tessellator)
}

pub fn extract_str(text: &str, tessellator: &dyn TessellationEngine) -> Result<ExtractionOutput> {
    let model = step::parse_step(text)?;
    let mut diagnostics = Diagnostics::default();

    let containment = build_containment_map(&model)?;
    let products = build_products(&model, &containment, tessellator, &mut diagnostics)?;
    let relationships = build_relationships(&model)?;

    Ok(ExtractionOutput {
        products,
        relationships,
        diagnostics,
    })
}

fn product_ifc_class(entity_type_upper: &str) -> Option<IfcClass> {
    Some(match entity_type_upper {
        "IFCPROJECT" => IfcClass::IfcProject,
        "IFCSITE" => IfcClass::IfcSite,
        "IFCBUILDING" => IfcClass::IfcBuilding,
        "IFCBUILDINGSTOREY" => IfcClass::IfcBuildingStorey,
        "IFCSPACE" => IfcClass::IfcSpace,
        "IFCWALL" => IfcClass::IfcWall,
        "IFCWALLSTANDARDCASE" => IfcClass::IfcWallStandardCase,
        "IFCSLAB" => IfcClass::IfcSlab,
        "IFCCOLUMN" => IfcClass::IfcColumn,
        "IFCBEAM" => IfcClass::IfcBeam,
        "IFCDOOR" => IfcClass::IfcDoor,
        "IFCWINDOW" => IfcClass::IfcWindow,
        "IFCROOF" => IfcClass::IfcRoof,
        "IFCSTAIR" => IfcClass::IfcStair,
        "IFCSTAIRFLIGHT" => IfcClass::IfcStairFlight,
        "IFCRAILING" => IfcClass::IfcRailing,
        "IFCCOVERING" => IfcClass::IfcCovering,
        "IFCFURNISHINGELEMENT" => IfcClass::IfcFurnishingElement,
        "IFCPLATE" => IfcClass::IfcPlate,
        "IFCMEMBER" => IfcClass::IfcMember,
        _ => return None,
    })
}

fn instance_global_id(inst: &step::StepInstance) -> Result<GlobalId> {
    let raw = inst.attributes.first().and_then(StepValue::as_string).ok_or_else(|| {
        BimAtlasError::Extraction(format!(
            "entity #{} ({}) is missing a GlobalId attribute",
            inst.id, inst.entity_type
        ))
    })?;
    GlobalId::new(raw)
}

fn resolve_ref(model: &StepModel, id: u64) -> Result<&step::StepInstance> {
    model
        .get(id)
        .ok_or_else(|| BimAtlasError::Extraction(format!("dangling STEP reference to #{id}")))
}

/// Build the element → enclosing spatial container map (§4.1) from
/// `IfcRelContainedInSpatialStructure` (direct containers) and
/// `IfcRelAggregates` restricted to spatial-to-spatial aggregation.
fn build_containment_map(model: &StepModel) -> Result<HashMap<GlobalId, GlobalId>> {
    let mut containment = HashMap::new();

    for inst in model.of_type("IFCRELCONTAINEDINSPATIALSTRUCTURE") {
        let related = inst
            .attributes
            .get(4)
            .and_then(StepValue::as_list)
            .ok_or_else(|| BimAtlasError::Extraction(format!("#{}: missing RelatedElements", inst.id)))?;
        let structure_ref = inst
            .attributes
            .get(5)
            .and_then(StepValue::as_ref_id)
            .ok_or_else(|| BimAtlasError::Extraction(format!("#{}: missing RelatingStructure", inst.id)))?;
        let structure = resolve_ref(model, structure_ref)?;
        let container_gid = instance_global_id(structure)?;

        for elem in related {
            let elem_ref = elem
                .as_ref_id()
                .ok_or_else(|| BimAtlasError::Extraction(format!("#{}: RelatedElements entry is not a reference", inst.id)))?;
            let elem_inst = resolve_ref(model, elem_ref)?;
            containment.insert(instance_global_id(elem_inst)?, container_gid.clone());
        }
    }

    for inst in model.of_type("IFCRELAGGREGATES") {
        let relating_ref = inst
            .attributes
            .get(4)
            .and_then(StepValue::as_ref_id)
            .ok_or_else(|| BimAtlasError::Extraction(format!("#{}: missing RelatingObject", inst.id)))?;
        let relating = resolve_ref(model, relating_ref)?;
        let relating_is_spatial = product_ifc_class(&relating.entity_type).map_or(false, |c| c.is_spatial());
        if !relating_is_spatial {
            continue;
        }
        let relating_gid = instance_global_id(relating)?;

        let related = inst
            .attributes
            .get(5)
            .and_then(StepValue::as_list)
            .ok_or_else(|| BimAtlasError::Extraction(format!("#{}: missing RelatedObjects", inst.id)))?;
        for child in related {
            let child_ref = child
                .as_ref_id()
                .ok_or_else(|| BimAtlasError::Extraction(format!("#{}: RelatedObjects entry is not a reference", inst.id)))?;
            let child_inst = resolve_ref(model, child_ref)?;
            let child_is_spatial = product_ifc_class(&child_inst.entity_type).map_or(false, |c| c.is_spatial());
            if child_is_spatial {
                containment.insert(instance_global_id(child_inst)?, relating_gid.clone());
            }
        }
    }

    Ok(containment)
}

fn build_products(
    model: &StepModel,
    containment: &HashMap<GlobalId, GlobalId>,
    tessellator: &dyn TessellationEngine,
    diagnostics: &mut Diagnostics,
) -> Result<Vec<ProductRecord>> {
    let mut products = Vec::new();

    for inst in model.all() {
        let Some(ifc_class) = product_ifc_class(&inst.entity_type) else {
            continue;
        };
        let global_id = instance_global_id(inst)?;
        let name = inst.attributes.get(2).and_then(StepValue::as_string).map(str::to_string);
        let description = inst.attributes.get(3).and_then(StepValue::as_string).map(str::to_string);
        let object_type = inst.attributes.get(4).and_then(StepValue::as_string).map(str::to_string);
        let tag = inst.attributes.get(7).and_then(StepValue::as_string).map(str::to_string);
        let contained_in = containment.get(&global_id).cloned();

        let mesh = if ifc_class.is_spatial() {
            Mesh::empty()
        } else {
            match tessellator.tessellate(&global_id, &ifc_class) {
                Ok(mesh) => mesh,
                Err(e) => {
                    diagnostics.record(
                        Severity::Warning,
                        "TESSELLATION_FAILED",
                        format!("tessellation failed for {global_id}: {e}"),
                        Some(global_id.clone()),
                    );
                    Mesh::empty()
                }
            }
        };

        products.push(ProductRecord {
            global_id,
            ifc_class,
            name,
            description,
            object_type,
            tag,
            contained_in,
            mesh,
        });
    }

    Ok(products)
}

fn build_relationships(model: &StepModel) -> Result<Vec<RelationshipRecord>> {
    let mut relationships = Vec::new();

    let mut push_edge = |relationships: &mut Vec<RelationshipRecord>,
                          inst: &step::StepInstance,
                          from_idx: usize,
                          to_idx: usize,
                          kind: RelationshipKind| -> Result<()> {
        let from_ref = inst.attributes.get(from_idx).and_then(StepValue::as_ref_id).ok_or_else(|| {
            BimAtlasError::Extraction(format!("#{}: missing relationship endpoint", inst.id))
        })?;
        let to_ref = inst.attributes.get(to_idx).and_then(StepValue::as_ref_id).ok_or_else(|| {
            BimAtlasError::Extraction(format!("#{}: missing relationship endpoint", inst.id))
        })?;
        let from = instance_global_id(resolve_ref(model, from_ref)?)?;
        let to = instance_global_id(resolve_ref(model, to_ref)?)?;
        relationships.push(RelationshipRecord {
            from_global_id: from,
            to_global_id: to,
            relationship_type: kind,
        });
        Ok(())
    };

    for inst in model.of_type("IFCRELCONTAINEDINSPATIALSTRUCTURE") {
        let structure_ref = inst.attributes.get(5).and_then(StepValue::as_ref_id).ok_or_else(|| {
            BimAtlasError::Extraction(format!("#{}: missing RelatingStructure", inst.id))
        })?;
        let structure = instance_global_id(resolve_ref(model, structure_ref)?)?;
        let related = inst.attributes.get(4).and_then(StepValue::as_list).ok_or_else(|| {
            BimAtlasError::Extraction(format!("#{}: missing RelatedElements", inst.id))
        })?;
        for elem in related {
            let elem_ref = elem.as_ref_id().ok_or_else(|| {
                BimAtlasError::Extraction(format!("#{}: RelatedElements entry is not a reference", inst.id))
            })?;
            let elem_gid = instance_global_id(resolve_ref(model, elem_ref)?)?;
            relationships.push(RelationshipRecord {
                from_global_id: structure.clone(),
                to_global_id: elem_gid,
                relationship_type: RelationshipKind::IfcRelContainedInSpatialStructure,
            });
        }
    }

    for inst in model.of_type("IFCRELAGGREGATES") {
        let relating_ref = inst.attributes.get(4).and_then(StepValue::as_ref_id).ok_or_else(|| {
            BimAtlasError::Extraction(format!("#{}: missing RelatingObject", inst.id))
        })?;
        let relating = instance_global_id(resolve_ref(model, relating_ref)?)?;
        let related = inst.attributes.get(5).and_then(StepValue::as_list).ok_or_else(|| {
            BimAtlasError::Extraction(format!("#{}: missing RelatedObjects", inst.id))
        })?;
        for child in related {
            let child_ref = child.as_ref_id().ok_or_else(|| {
                BimAtlasError::Extraction(format!("#{}: RelatedObjects entry is not a reference", inst.id))
            })?;
            let child_gid = instance_global_id(resolve_ref(model, child_ref)?)?;
            relationships.push(RelationshipRecord {
                from_global_id: relating.clone(),
                to_global_id: child_gid,
                relationship_type: RelationshipKind::IfcRelAggregates,
            });
        }
    }

    for inst in model.of_type("IFCRELCONNECTSELEMENTS") {
        push_edge(&mut relationships, inst, 5, 6, RelationshipKind::IfcRelConnectsElements)?;
    }
    for inst in model.of_type("IFCRELVOIDSELEMENT") {
        push_edge(&mut relationships, inst, 4, 5, RelationshipKind::IfcRelVoidsElement)?;
    }
    for inst in model.of_type("IFCRELFILLSELEMENT") {
        push_edge(&mut relationships, inst, 4, 5, RelationshipKind::IfcRelFillsElement)?;
    }

    Ok(relationships)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
#1=IFCPROJECT('0o2Fr$t4X7Zf8NOew3FLA1',$,'Project',$,$,$,$,$,$);
#2=IFCSITE('1XS$$$$$$$$$$$$$$$$$$$0',$,'Site',$,$,$,$,$,$,$,$,$);
#3=IFCBUILDING('1XS$$$$$$$$$$$$$$$$$$1',$,'Building',$,$,$,$,$,$,$,$);
#4=IFCBUILDINGSTOREY('1XS$$$$$$$$$$$$$$$$$$2',$,'Level 1',$,$,$,$,$,$);
#5=IFCWALL('2O2Fr$t4X7Zf8NOew3FL9r',$,'Wall A',$,$,$,$,'TAG-1');
#10=IFCRELAGGREGATES('r1',$,$,$,#1,(#2));
#11=IFCRELAGGREGATES('r2',$,$,$,#2,(#3));
#12=IFCRELAGGREGATES('r3',$,$,$,#3,(#4));
#13=IFCRELCONTAINEDINSPATIALSTRUCTURE('r4',$,$,$,(#5),#4);
"#;

    #[test]
    fn extracts_products_and_containment() {
        let out = extract_str(SAMPLE, &NullTessellator).unwrap();
        assert_eq!(out.products.len(), 5);
        let wall = out
            .products
            .iter()
            .find(|p| p.ifc_class == IfcClass::IfcWall)
            .unwrap();
        assert_eq!(wall.name.as_deref(), Some("Wall A"));
        assert_eq!(
            wall.contained_in.as_ref().unwrap().as_str(),
            "1XS$$$$$$$$$$$$$$$$$$2"
        );
        let storey = out
            .products
            .iter()
            .find(|p| p.ifc_class == IfcClass::IfcBuildingStorey)
            .unwrap();
        assert_eq!(
            storey.contained_in.as_ref().unwrap().as_str(),
            "1XS$$$$$$$$$$$$$$$$$$1"
        );
        let project = out
            .products
            .iter()
            .find(|p| p.ifc_class == IfcClass::IfcProject)
            .unwrap();
        assert!(project.contained_in.is_none());
    }

    #[test]
    fn extracts_relationship_records() {
        let out = extract_str(SAMPLE, &NullTessellator).unwrap();
        assert!(out
            .relationships
            .iter()
            .any(|r| r.relationship_type == RelationshipKind::IfcRelContainedInSpatialStructure
                && r.to_global_id.as_str() == "2O2Fr$t4X7Zf8NOew3FL9r"));
        assert_eq!(
            out.relationships
                .iter()
                .filter(|r| r.relationship_type == RelationshipKind::IfcRelAggregates)
                .count(),
            3
        );
    }

    struct FailingTessellator;
    impl TessellationEngine for FailingTessellator {
        fn tessellate(&self, _g: &GlobalId, _c: &IfcClass) -> std::result::Result<Mesh, TessellationError> {
            Err(TessellationError("boom".to_string()))
        }
    }

    #[test]
    fn tessellation_failure_is_noted_not_dropped() {
        let out = extract_str(SAMPLE, &FailingTessellator).unwrap();
        assert_eq!(out.products.len(), 5);
        assert!(out.diagnostics.0.iter().any(|d| d.code == "TESSELLATION_FAILED"));
        let wall = out
            .products
            .iter()
            .find(|p| p.ifc_class == IfcClass::IfcWall)
            .unwrap();
        assert_eq!(wall.mesh, Mesh::empty());
    }

    #[test]
    fn dangling_reference_is_an_extraction_error() {
        let bad = "#1=IFCRELAGGREGATES('r',$,$,$,#99,(#2));";
        assert!(extract_str(bad, &NullTessellator).is_err());
    }
}
