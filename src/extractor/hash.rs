//! Deterministic content hashing (§4.1). SHA-256 over a canonical, fixed-
//! field-order serialization of the attributes-plus-geometry tuple. Two
//! products with identical attributes and geometry hash identically; the
//! reverse is not asserted.

use sha2::{Digest, Sha256};

use crate::model::{GlobalId, IfcClass, Mesh};

/// A length-prefixed field appended to the hash input, so e.g. `name=""`
/// and `description="x"` can never collide with `name="x"` and
/// `description=""` by simple concatenation.
fn push_field(buf: &mut Vec<u8>, field: &[u8]) {
    buf.extend_from_slice(&(field.len() as u64).to_le_bytes());
    buf.extend_from_slice(field);
}

#[allow(clippy::too_many_arguments)]
pub fn content_hash(
    ifc_class: &IfcClass,
    name: Option<&str>,
    description: Option<&str>,
    object_type: Option<&str>,
    tag: Option<&str>,
    contained_in: Option<&GlobalId>,
    mesh: &Mesh,
) -> String {
    let mut buf = Vec::new();
    push_field(&mut buf, ifc_class.as_str().as_bytes());
    push_field(&mut buf, name.unwrap_or("").as_bytes());
    push_field(&mut buf, description.unwrap_or("").as_bytes());
    push_field(&mut buf, object_type.unwrap_or("").as_bytes());
    push_field(&mut buf, tag.unwrap_or("").as_bytes());
    push_field(
        &mut buf,
        contained_in.map(GlobalId::as_str).unwrap_or("").as_bytes(),
    );
    push_field(&mut buf, &mesh.vertices_bytes());
    push_field(&mut buf, &mesh.normals_bytes());
    push_field(&mut buf, &mesh.faces_bytes());
    push_field(&mut buf, &mesh.matrix_bytes());

    let digest = Sha256::digest(&buf);
    hex::encode(digest)
}

/// Tiny hex encoder so this module doesn't need a dependency just for
/// `Digest::digest` output formatting.
mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        let mut s = String::with_capacity(bytes.as_ref().len() * 2);
        for b in bytes.as_ref() {
            s.push_str(&format!("{b:02x}"));
        }
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mesh() -> Mesh {
        Mesh {
            vertices: vec![0.0, 1.0, 2.0],
            normals: vec![0.0, 0.0, 1.0],
            faces: vec![0, 1, 2],
            matrix: [0.0; 16],
        }
    }

    #[test]
    fn hash_is_stable_under_repeated_calls() {
        let h1 = content_hash(&IfcClass::IfcWall, Some("Wall A"), None, None, None, None, &mesh());
        let h2 = content_hash(&IfcClass::IfcWall, Some("Wall A"), None, None, None, None, &mesh());
        assert_eq!(h1, h2);
    }

    #[test]
    fn hash_changes_when_name_changes() {
        let h1 = content_hash(&IfcClass::IfcWall, Some("Wall A"), None, None, None, None, &mesh());
        let h2 = content_hash(&IfcClass::IfcWall, Some("Wall A'"), None, None, None, None, &mesh());
        assert_ne!(h1, h2);
    }

    #[test]
    fn field_boundaries_do_not_collide() {
        // Without length-prefixing, name="ab" + description="" could collide
        // with name="a" + description="b".
        let h1 = content_hash(&IfcClass::IfcWall, Some("ab"), Some(""), None, None, None, &mesh());
        let h2 = content_hash(&IfcClass::IfcWall, Some("a"), Some("b"), None, None, None, &mesh());
        assert_ne!(h1, h2);
    }

    #[test]
    fn hash_unaffected_by_irrelevant_identity() {
        // global_id is deliberately excluded from the hash input (§4.1 lists
        // the exact field set and global_id is not among them).
        let h1 = content_hash(&IfcClass::IfcWall, Some("Wall A"), None, None, None, None, &mesh());
        let h2 = content_hash(&IfcClass::IfcWall, Some("Wall A"), None, None, None, None, &mesh());
        assert_eq!(h1, h2);
    }
}
