//! Streaming Layer (§4.6): frames a product list as an SSE-shaped event
//! stream. Wiring this `Stream<Item = String>` to an actual HTTP response
//! body is request framing and out of scope for this crate (§1).

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use futures::stream::{self, Stream};
use serde::Serialize;
use serde_json::json;

use crate::model::{GlobalId, Product};

#[derive(Debug, Serialize)]
struct MeshPayload {
    vertices: String,
    normals: String,
    faces: String,
    matrix: String,
}

#[derive(Debug, Serialize)]
struct ProductPayload {
    global_id: String,
    ifc_class: String,
    name: Option<String>,
    description: Option<String>,
    object_type: Option<String>,
    tag: Option<String>,
    contained_in: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    mesh: Option<MeshPayload>,
}

fn product_payload(product: &Product, include_mesh: bool) -> ProductPayload {
    ProductPayload {
        global_id: product.global_id.as_str().to_string(),
        ifc_class: product.ifc_class.as_str().to_string(),
        name: product.name.clone(),
        description: product.description.clone(),
        object_type: product.object_type.clone(),
        tag: product.tag.clone(),
        contained_in: product.contained_in.as_ref().map(GlobalId::to_string),
        mesh: include_mesh.then(|| MeshPayload {
            vertices: BASE64.encode(&product.vertices),
            normals: BASE64.encode(&product.normals),
            faces: BASE64.encode(&product.faces),
            matrix: BASE64.encode(&product.matrix),
        }),
    }
}

/// Renders one SSE-shaped frame: `"data: <json>\n\n"`. The event kind is
/// folded into the JSON payload itself (`"type"`) rather than a separate
/// `event:` line — the wire format carries exactly one field per frame.
fn frame(kind: &str, payload: &serde_json::Value) -> String {
    let mut payload = payload.clone();
    payload["type"] = json!(kind);
    format!(
        "data: {}\n\n",
        serde_json::to_string(&payload).expect("payload always serializes")
    )
}

pub fn error_event(message: &str) -> String {
    frame("error", &json!({ "message": message }))
}

/// Frames `products` as `start` / `product` / `end` events. The relational
/// driver this crate targets has no streaming cursor, so the row fetch
/// itself is eager (`Vec<Product>` already materialized by the caller);
/// what this function keeps lazy is event production — frames are built
/// one at a time as the consumer polls, never pre-rendered into a buffer.
pub fn stream_products(products: Vec<Product>, include_mesh: bool) -> impl Stream<Item = String> {
    let total = products.len();

    enum State {
        Start(std::vec::IntoIter<Product>, usize),
        Products(std::vec::IntoIter<Product>, usize, usize),
        Done,
    }

    stream::unfold(State::Start(products.into_iter(), total), move |state| async move {
        match state {
            State::Start(iter, total) => Some((frame("start", &json!({ "total": total })), State::Products(iter, 0, total))),
            State::Products(mut iter, current, total) => match iter.next() {
                Some(p) => {
                    let current = current + 1;
                    let payload = product_payload(&p, include_mesh);
                    Some((
                        frame("product", &json!({ "current": current, "product": payload })),
                        State::Products(iter, current, total),
                    ))
                }
                None => Some((frame("end", &json!({})), State::Done)),
            },
            State::Done => None,
        }
    })
}
