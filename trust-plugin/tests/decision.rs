// Copyright (c) 2024 The container-trust-plugin Authors
//
// SPDX-License-Identifier: Apache-2.0
//

use std::{sync::Arc, time::Duration};

use container_trust_plugin::{decide, AuthZResponse, Decision, Error, InterceptedRequest};
use rstest::rstest;

mod common;

use common::*;

fn digest_pull(repository: &str) -> InterceptedRequest {
    pull(&format!(
        "/v1.24/images/create?fromImage={repository}&tag={}",
        manifest_digest()
    ))
}

#[rstest]
#[case("GET", "/v1.24/containers/json")]
#[case("POST", "/v1.24/containers/create")]
#[case("GET", "/v1.24/images/create?fromImage=busybox")]
#[case("POST", "/v1.24/images/create?fromSrc=-&repo=busybox")]
#[tokio::test]
async fn non_pull_requests_pass_through(#[case] method: &str, #[case] uri: &str) {
    let registries = FakeRegistries::new(&["redhat.io", "docker.io"]);
    let evaluator = FakeEvaluator::new(Verdict::Denied);
    let engine = FakeEngine::new();

    let decision = decide(
        &InterceptedRequest::new(method, uri),
        &collaborators(&registries, &evaluator, &engine),
    )
    .await;

    assert!(decision.is_allowed());
    assert_eq!(registries.calls(), 0);
    assert!(evaluator.evaluated().is_empty());
    assert!(engine.calls().is_empty());
}

#[tokio::test]
async fn all_tags_pull_is_denied() {
    let registries = FakeRegistries::new(&[]);
    let evaluator = FakeEvaluator::new(Verdict::Allowed);
    let engine = FakeEngine::new();

    let decision = decide(
        &pull("/v1.24/images/create?fromImage=busybox"),
        &collaborators(&registries, &evaluator, &engine),
    )
    .await;

    assert!(matches!(decision, Decision::Deny(Error::AllTagsPull)));
    assert_eq!(
        decision.message().unwrap(),
        "unable to verify all tags for the given image"
    );
    assert!(evaluator.evaluated().is_empty());
}

#[rstest]
#[case(Verdict::Allowed)]
#[case(Verdict::Denied)]
#[tokio::test]
async fn several_registries_are_ambiguous(#[case] verdict: Verdict) {
    let registries = FakeRegistries::new(&["redhat.io", "docker.io"]);
    let evaluator = FakeEvaluator::new(verdict);
    let engine = FakeEngine::new();

    let decision = decide(
        &digest_pull("busybox"),
        &collaborators(&registries, &evaluator, &engine),
    )
    .await;

    assert!(matches!(decision, Decision::Deny(Error::AmbiguousQualification)));
    assert_eq!(
        decision.message().unwrap(),
        "can't check signatures, please pull with a fully qualified image name"
    );
    assert!(evaluator.evaluated().is_empty());
}

#[tokio::test]
async fn fully_qualified_reference_is_not_rewritten() {
    let registries = FakeRegistries::new(&["redhat.io", "docker.io"]);
    let evaluator = FakeEvaluator::new(Verdict::Allowed);
    let engine = FakeEngine::new();

    let decision = decide(
        &digest_pull("quay.io%2Ffoo%2Fbar"),
        &collaborators(&registries, &evaluator, &engine),
    )
    .await;

    assert!(decision.is_allowed(), "{decision:?}");
    assert_eq!(registries.calls(), 0);
    assert_eq!(
        evaluator.evaluated(),
        vec![format!("quay.io/foo/bar@{}", manifest_digest())]
    );
}

#[rstest]
#[case(&["redhat.io"], "redhat.io/busybox:latest")]
#[case(&["docker.io"], "busybox:latest")]
#[case(&[""], "busybox:latest")]
#[case(&[], "busybox:latest")]
#[tokio::test]
async fn single_registry_qualification(#[case] configured: &[&str], #[case] evaluated: &str) {
    let registries = FakeRegistries::new(configured);
    let evaluator = FakeEvaluator::new(Verdict::Denied);
    let engine = FakeEngine::new();

    let decision = decide(
        &pull("/images/create?fromImage=busybox&tag=latest"),
        &collaborators(&registries, &evaluator, &engine),
    )
    .await;

    assert!(matches!(decision, Decision::Deny(Error::PolicyDenied)));
    assert_eq!(evaluator.evaluated(), vec![evaluated.to_string()]);
}

#[tokio::test]
async fn policy_denial_is_a_message() {
    let registries = FakeRegistries::new(&[]);
    let evaluator = FakeEvaluator::new(Verdict::Denied);
    let engine = FakeEngine::new();

    let decision = decide(
        &digest_pull("busybox"),
        &collaborators(&registries, &evaluator, &engine),
    )
    .await;

    assert_eq!(decision.message().unwrap(), "image isn't allowed");
    let response = AuthZResponse::from(decision);
    assert!(!response.allow);
    assert_eq!(response.msg.as_deref(), Some("image isn't allowed"));
    assert_eq!(response.err, None);
}

#[tokio::test]
async fn evaluation_failure_is_an_error() {
    let registries = FakeRegistries::new(&[]);
    let evaluator = FakeEvaluator::new(Verdict::Fails("policy file is corrupted"));
    let engine = FakeEngine::new();

    let decision = decide(
        &digest_pull("busybox"),
        &collaborators(&registries, &evaluator, &engine),
    )
    .await;

    assert!(matches!(decision, Decision::Deny(Error::PolicyEvaluation { .. })));
    let response = AuthZResponse::from(decision);
    assert_eq!(response.err.as_deref(), Some("policy file is corrupted"));
    assert_eq!(response.msg, None);
}

#[tokio::test]
async fn registry_list_failure_denies() {
    let registries = FakeRegistries::failing();
    let evaluator = FakeEvaluator::new(Verdict::Allowed);
    let engine = FakeEngine::new();

    let decision = decide(
        &digest_pull("busybox"),
        &collaborators(&registries, &evaluator, &engine),
    )
    .await;

    assert!(matches!(decision, Decision::Deny(Error::RegistryList { .. })));
    assert!(decision.message().unwrap().contains("connection refused"));
    assert!(evaluator.evaluated().is_empty());
}

#[tokio::test]
async fn matching_digest_is_allowed() {
    let registries = FakeRegistries::new(&[]);
    let evaluator = FakeEvaluator::new(Verdict::Allowed);
    let engine = FakeEngine::new();

    let decision = decide(
        &digest_pull("busybox"),
        &collaborators(&registries, &evaluator, &engine).with_auto_pull(true),
    )
    .await;

    assert!(decision.is_allowed(), "{decision:?}");
    assert!(engine.calls().is_empty());
}

#[tokio::test]
async fn mismatched_digest_is_denied() {
    let registries = FakeRegistries::new(&[]);
    let evaluator = FakeEvaluator::new(Verdict::Allowed);
    let engine = FakeEngine::new();

    let provided = "sha256:0000000000000000000000000000000000000000000000000000000000000000";
    let decision = decide(
        &pull(&format!("/images/create?fromImage=busybox&tag={provided}")),
        &collaborators(&registries, &evaluator, &engine),
    )
    .await;

    assert!(matches!(decision, Decision::Deny(Error::DigestMismatch { .. })));
    assert_eq!(
        decision.message().unwrap(),
        format!(
            "digests mismatch, provided {provided}, computed {}",
            manifest_digest()
        )
    );
}

#[tokio::test]
async fn tag_pull_needs_manual_pull_without_auto_pull() {
    let registries = FakeRegistries::new(&["redhat.io"]);
    let evaluator = FakeEvaluator::new(Verdict::Allowed);
    let engine = FakeEngine::new();

    let decision = decide(
        &pull("/v1.24/images/create?fromImage=foo%2Fbar&tag=v1"),
        &collaborators(&registries, &evaluator, &engine),
    )
    .await;

    let digest = manifest_digest();
    assert!(matches!(decision, Decision::Deny(Error::ManualPullRequired { .. })));
    assert_eq!(
        decision.message().unwrap(),
        format!(
            "image is allowed but can't pull by tag. Pull the image with \
             'docker pull foo/bar@{digest}' and tag it with \
             'docker tag foo/bar@{digest} foo/bar:v1'"
        )
    );
    assert_eq!(evaluator.evaluated(), vec!["redhat.io/foo/bar:v1".to_string()]);
    assert!(engine.calls().is_empty());
}

#[tokio::test]
async fn auto_pull_pulls_by_digest_then_tags() {
    let registries = FakeRegistries::new(&[]);
    let evaluator = FakeEvaluator::new(Verdict::Allowed);
    let engine = FakeEngine::new();

    let decision = decide(
        &pull("/v1.24/images/create?fromImage=busybox&tag=1.36"),
        &collaborators(&registries, &evaluator, &engine).with_auto_pull(true),
    )
    .await;

    let digest = manifest_digest();
    assert!(decision.is_allowed(), "{decision:?}");
    assert_eq!(
        engine.calls(),
        vec![
            format!("pull busybox@{digest}"),
            format!("tag busybox@{digest} busybox:1.36"),
        ]
    );
}

#[rstest]
#[case(true, false, "manifest unknown", 1)]
#[case(false, true, "no such image", 2)]
#[tokio::test]
async fn auto_pull_failure_denies(
    #[case] fail_pull: bool,
    #[case] fail_tag: bool,
    #[case] message: &str,
    #[case] engine_calls: usize,
) {
    let registries = FakeRegistries::new(&[]);
    let evaluator = FakeEvaluator::new(Verdict::Allowed);
    let engine = Arc::new(FakeEngine {
        fail_pull,
        fail_tag,
        ..Default::default()
    });

    let decision = decide(
        &pull("/v1.24/images/create?fromImage=busybox&tag=latest"),
        &collaborators(&registries, &evaluator, &engine).with_auto_pull(true),
    )
    .await;

    assert!(matches!(decision, Decision::Deny(Error::AutoPull { .. })));
    assert_eq!(decision.message().unwrap(), message);
    assert_eq!(engine.calls().len(), engine_calls);
}

#[tokio::test(start_paused = true)]
async fn hung_evaluation_times_out() {
    let registries = FakeRegistries::new(&[]);
    let evaluator = FakeEvaluator::new(Verdict::Hangs);
    let engine = FakeEngine::new();

    let decision = decide(
        &digest_pull("busybox"),
        &collaborators(&registries, &evaluator, &engine)
            .with_timeout(Some(Duration::from_secs(5))),
    )
    .await;

    assert!(matches!(decision, Decision::Deny(Error::Timeout { .. })));
    assert_eq!(
        decision.message().unwrap(),
        "policy evaluation timed out after 5s"
    );
}

#[tokio::test]
async fn embedded_tag_is_used_when_tag_parameter_is_empty() {
    let registries = FakeRegistries::new(&[]);
    let evaluator = FakeEvaluator::new(Verdict::Allowed);
    let engine = FakeEngine::new();

    let decision = decide(
        &pull("/v1.24/images/create?fromImage=localhost%3A5000%2Fapp%3Av2&tag="),
        &collaborators(&registries, &evaluator, &engine),
    )
    .await;

    assert!(matches!(decision, Decision::Deny(Error::ManualPullRequired { .. })));
    assert_eq!(evaluator.evaluated(), vec!["localhost:5000/app:v2".to_string()]);
    assert_eq!(registries.calls(), 0);
}

#[rstest]
#[case("/v1.24/images%2Fcreate?fromImage=evil&tag=latest")]
#[case("/v1.24/%69mages/create?fromImage=evil&tag=latest")]
#[tokio::test]
async fn encoded_pull_path_is_still_checked(#[case] uri: &str) {
    let registries = FakeRegistries::new(&[]);
    let evaluator = FakeEvaluator::new(Verdict::Denied);
    let engine = FakeEngine::new();

    let decision = decide(&pull(uri), &collaborators(&registries, &evaluator, &engine)).await;

    assert!(matches!(decision, Decision::Deny(Error::PolicyDenied)));
    assert_eq!(evaluator.evaluated(), vec!["evil:latest".to_string()]);
}
