use crate::error::ResolveError;
use serde_json::Value;

const SPEC: &str = "/request/object/spec";
const TEMPLATE_CONTAINERS: &str = "/template/spec/containers";

/// Container specs of an admission request: `spec.containers` first, then
/// `spec.template.spec.containers`, each in document order.
pub fn containers(payload: &Value) -> Vec<&Value> {
    let Some(spec) = payload.pointer(SPEC) else {
        return Vec::new();
    };
    array_items(spec.get("containers"))
        .chain(array_items(spec.pointer(TEMPLATE_CONTAINERS)))
        .collect()
}

/// Mutable counterpart of [`containers`], same order.
pub fn containers_mut(payload: &mut Value) -> Vec<&mut Value> {
    let Some(spec) = payload.pointer_mut(SPEC).and_then(Value::as_object_mut) else {
        return Vec::new();
    };

    let mut outer = Vec::new();
    let mut template = Vec::new();
    for (key, value) in spec.iter_mut() {
        match key.as_str() {
            "containers" => outer.extend(array_items_mut(Some(value))),
            "template" => template.extend(array_items_mut(value.pointer_mut("/spec/containers"))),
            _ => {}
        }
    }
    outer.extend(template);
    outer
}

pub fn container_image(container: &Value) -> Result<&str, ResolveError> {
    container
        .get("image")
        .and_then(Value::as_str)
        .ok_or_else(|| ResolveError::InvalidReference("Container spec has no image".to_string()))
}

fn array_items(value: Option<&Value>) -> impl Iterator<Item = &Value> {
    value.and_then(Value::as_array).into_iter().flatten()
}

fn array_items_mut(value: Option<&mut Value>) -> impl Iterator<Item = &mut Value> {
    value.and_then(Value::as_array_mut).into_iter().flatten()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn deployment() -> Value {
        json!({
            "kind": "AdmissionReview",
            "request": {
                "uid": "test",
                "object": {
                    "kind": "Deployment",
                    "spec": {
                        "replicas": 1,
                        "template": {
                            "spec": {
                                "initContainers": [{"name": "init", "image": "busybox:1.36"}],
                                "containers": [
                                    {"name": "app", "image": "quay.io/org/app:1.0"},
                                    {"name": "sidecar", "image": "envoyproxy/envoy:v1.30.0"}
                                ]
                            }
                        },
                        "containers": [{"name": "outer", "image": "curl:3.2.1"}]
                    }
                }
            }
        })
    }

    fn images(containers: Vec<&Value>) -> Vec<&str> {
        containers
            .into_iter()
            .map(|c| container_image(c).unwrap())
            .collect()
    }

    #[test]
    fn test_outer_containers_come_before_template_containers() {
        let payload = deployment();
        assert_eq!(
            images(containers(&payload)),
            vec!["curl:3.2.1", "quay.io/org/app:1.0", "envoyproxy/envoy:v1.30.0"]
        );
    }

    #[test]
    fn test_mutable_walk_has_the_same_order() {
        let mut payload = deployment();
        for (i, container) in containers_mut(&mut payload).into_iter().enumerate() {
            container["image"] = json!(format!("image-{}", i));
        }
        let spec = &payload["request"]["object"]["spec"];
        assert_eq!(spec["containers"][0]["image"], "image-0");
        assert_eq!(spec["template"]["spec"]["containers"][0]["image"], "image-1");
        assert_eq!(spec["template"]["spec"]["containers"][1]["image"], "image-2");
        assert_eq!(
            spec["template"]["spec"]["initContainers"][0]["image"],
            "busybox:1.36"
        );
    }

    #[test]
    fn test_missing_spec_yields_nothing() {
        let mut payload = json!({"kind": "AdmissionReview", "request": {"uid": "x"}});
        assert!(containers(&payload).is_empty());
        assert!(containers_mut(&mut payload).is_empty());
    }

    #[test]
    fn test_container_without_image() {
        let err = container_image(&json!({"name": "broken"})).unwrap_err();
        assert_eq!(err.to_string(), "Container spec has no image");
    }
}
