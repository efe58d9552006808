use super::*;
use maplit::btreemap;
use serde_yaml::Value;
use std::{sync::Arc, thread};

const POD_AND_JOB: &str = "\
apiVersion: v1
kind: Pod
metadata:
  name: test-pod
spec:
  containers:
  - name: app
    image: busybox
---
apiVersion: batch/v1
kind: Job
metadata:
  name: migrate
  annotations:
    istio.skip: \"true\"
spec:
  template:
    spec:
      restartPolicy: Never
      containers:
      - name: migrate
        image: migrate:1
---
";

fn container(name: &str) -> Container {
    Container {
        name: name.to_string(),
        ..Default::default()
    }
}

fn envoy_config() -> SidecarConfig {
    SidecarConfig {
        container: container("envoy"),
        init_containers: vec![container("init-a")],
        annotations: btreemap! { "team".to_string() => "x".to_string() },
    }
}

fn mutator(config: SidecarConfig) -> ManifestMutator {
    ManifestMutator::new(DEFAULT_SKIP_ANNOTATION, config.into())
}

fn docs(manifest: &str) -> Vec<Value> {
    manifest::documents(manifest)
        .map(|doc| serde_yaml::from_str(doc).unwrap())
        .collect()
}

fn container_names(containers: &Value) -> Vec<&str> {
    containers
        .as_sequence()
        .unwrap()
        .iter()
        .map(|c| c["name"].as_str().unwrap())
        .collect()
}

/// A Pod gains the sidecar while a Job carrying the skip annotation is forwarded byte-for-byte.
#[test]
fn injects_pod_and_skips_annotated_job() {
    let out = mutator(envoy_config()).mutate_manifest(POD_AND_JOB).unwrap();

    let job = manifest::documents(POD_AND_JOB).nth(1).unwrap();
    let mut expected_skip = job.to_string();
    expected_skip.push_str(manifest::SEPARATOR);
    assert!(out.starts_with(&expected_skip), "{out}");

    let docs = docs(&out);
    assert_eq!(docs.len(), 2);
    let pod = &docs[1];
    assert_eq!(pod["kind"].as_str(), Some("Pod"));
    assert_eq!(container_names(&pod["spec"]["containers"]), vec!["app", "envoy"]);

    let annotations = &pod["metadata"]["annotations"];
    assert_eq!(annotations["team"].as_str(), Some("x"));
    let init = serde_json::from_str::<Vec<Container>>(
        annotations[INIT_CONTAINERS_ANNOTATION].as_str().unwrap(),
    )
    .unwrap();
    assert_eq!(init, vec![container("init-a")]);
}

/// Tiller reads manifests as YAML 1.1, where a plain `0644` is the octal mode 420. The mutated
/// Deployment must still carry an integer mode rather than the string "0644".
#[test]
fn octal_file_modes_survive_mutation() {
    let deployment = "\
apiVersion: apps/v1
kind: Deployment
metadata:
  name: web
spec:
  template:
    spec:
      containers:
      - name: app
        image: nginx
      volumes:
      - name: cfg
        configMap:
          name: web-config
          defaultMode: 0644
";
    let out = mutator(envoy_config()).mutate_manifest(deployment).unwrap();

    let docs = docs(&out);
    assert_eq!(docs.len(), 1);
    let spec = &docs[0]["spec"]["template"]["spec"];
    let mode = &spec["volumes"][0]["configMap"]["defaultMode"];
    assert_eq!(mode.as_u64(), Some(420), "{out}");
    assert!(!mode.is_string(), "{out}");
    assert_eq!(container_names(&spec["containers"]), vec!["app", "envoy"]);
}

#[test]
fn skipped_documents_are_idempotent() {
    let job = "kind: Job\nmetadata:\n  annotations: {istio.skip: 'y'}   # keep me\n";
    let out = mutator(envoy_config()).mutate_manifest(job).unwrap();
    assert_eq!(out, format!("{job}{}", manifest::SEPARATOR));
}

#[test]
fn custom_skip_annotation() {
    let mutator = ManifestMutator::new("example.com/no-sidecar", envoy_config().into());
    let manifest = "\
kind: Pod
metadata:
  annotations:
    istio.skip: 'y'
---
kind: Pod
metadata:
  annotations:
    example.com/no-sidecar: 'y'
";
    let docs = docs(&mutator.mutate_manifest(manifest).unwrap());
    assert_eq!(docs.len(), 2);
    // The exempt pod comes first and is unmodified.
    assert!(docs[0].get("spec").is_none());
    assert_eq!(container_names(&docs[1]["spec"]["containers"]), vec!["envoy"]);
}

#[test]
fn preserves_document_count_and_order() {
    let manifest = "\
kind: Service
metadata: {name: svc}
---
kind: Deployment
metadata: {name: a}
---
kind: Job
metadata: {name: skipped, annotations: {istio.skip: 'y'}}
---
kind: ConfigMap
metadata: {name: cm}
---
kind: StatefulSet
metadata: {name: b}
";
    let out = mutator(envoy_config()).mutate_manifest(manifest).unwrap();
    let names = docs(&out)
        .iter()
        .map(|d| d["metadata"]["name"].as_str().unwrap().to_string())
        .collect::<Vec<_>>();
    assert_eq!(names, vec!["skipped", "svc", "a", "cm", "b"]);
}

#[test]
fn empty_manifest() {
    assert_eq!(mutator(envoy_config()).mutate_manifest("").unwrap(), "");
}

#[test]
fn mutation_requires_loaded_config() {
    let config = SharedSidecarConfig::default();
    let error = config.load_from(b"name: envoy\n", b"team: [x").unwrap_err();
    assert!(matches!(error, ConfigError::Annotations(_)));

    let mutator = ManifestMutator::new(DEFAULT_SKIP_ANNOTATION, config);
    let error = mutator.mutate_manifest(POD_AND_JOB).unwrap_err();
    assert!(error.is_config(), "{error}");
    assert!(matches!(error, Error::Config(ConfigError::NotLoaded)));
}

#[test]
fn decode_errors_abort_the_manifest() {
    let manifest = "kind: Pod\n---\nmetadata: {name: no-kind}\n";
    let error = mutator(envoy_config()).mutate_manifest(manifest).unwrap_err();
    assert!(error.is_decode(), "{error}");
}

#[test]
fn reloads_apply_to_later_mutations() {
    let config = SharedSidecarConfig::default();
    config.load_from(b"name: envoy\n", b"").unwrap();
    let mutator = ManifestMutator::new(DEFAULT_SKIP_ANNOTATION, config.clone());

    let before = docs(&mutator.mutate_manifest("kind: Pod\n").unwrap());
    assert_eq!(container_names(&before[0]["spec"]["containers"]), vec!["envoy"]);

    config.load_from(b"name: istio-proxy\n", b"").unwrap();
    let after = docs(&mutator.mutate_manifest("kind: Pod\n").unwrap());
    assert_eq!(
        container_names(&after[0]["spec"]["containers"]),
        vec!["istio-proxy"]
    );
}

/// Concurrent mutations observe either the old or the new configuration, never a mix.
#[test]
fn concurrent_reloads_are_atomic() {
    let config = SharedSidecarConfig::default();
    config
        .load_from(b"name: old\n", b"generation: old\n")
        .unwrap();
    let mutator = Arc::new(ManifestMutator::new(DEFAULT_SKIP_ANNOTATION, config.clone()));

    let readers = (0..4)
        .map(|_| {
            let mutator = mutator.clone();
            thread::spawn(move || {
                for _ in 0..50 {
                    let out = mutator.mutate_manifest("kind: Pod\n").unwrap();
                    let pod = &docs(&out)[0];
                    let sidecar = pod["spec"]["containers"][0]["name"].as_str().unwrap();
                    let generation = pod["metadata"]["annotations"]["generation"]
                        .as_str()
                        .unwrap();
                    assert_eq!(sidecar, generation);
                }
            })
        })
        .collect::<Vec<_>>();

    for i in 0..50 {
        let name = if i % 2 == 0 { "new" } else { "old" };
        config
            .load_from(
                format!("name: {name}\n").as_bytes(),
                format!("generation: {name}\n").as_bytes(),
            )
            .unwrap();
    }

    for reader in readers {
        reader.join().unwrap();
    }
}
