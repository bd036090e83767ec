//! Provider webhook payloads reduced to [`NormalizedEvent`].
//!
//! Dispatch is a flat table of `(provider, event type) -> fn`; anything not in
//! the table, or an action the table entry does not care about, normalizes to
//! `Ok(None)` and is ignored by the router.

use crate::commands::parse_directive;
use crate::error::WebhookError;
use crate::types::{CommentDirective, EventKind, NormalizedEvent, VcsProvider};
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

type Normalizer = fn(&Value) -> Result<Option<NormalizedEvent>, WebhookError>;

const NORMALIZERS: &[(VcsProvider, &str, Normalizer)] = &[
    (VcsProvider::Github, "pull_request", github_pull_request),
    (VcsProvider::Github, "push", github_push),
    (VcsProvider::Github, "delete", github_delete),
    (VcsProvider::Github, "issue_comment", github_issue_comment),
    (VcsProvider::Gitlab, "Merge Request Hook", gitlab_merge_request),
    (VcsProvider::Gitlab, "Push Hook", gitlab_push),
    (VcsProvider::Gitlab, "Note Hook", gitlab_note),
    (VcsProvider::Bitbucket, "pullrequest:created", bitbucket_pull_request),
    (VcsProvider::Bitbucket, "pullrequest:updated", bitbucket_pull_request),
    (VcsProvider::Bitbucket, "pullrequest:fulfilled", bitbucket_merged),
    (VcsProvider::Bitbucket, "repo:push", bitbucket_push),
    (VcsProvider::Bitbucket, "pullrequest:comment_created", bitbucket_comment),
];

/// Header carrying the event type for each provider.
pub fn event_type_header(provider: VcsProvider) -> &'static str {
    match provider {
        VcsProvider::Github => "x-github-event",
        VcsProvider::Gitlab => "x-gitlab-event",
        VcsProvider::Bitbucket => "x-event-key",
    }
}

pub fn normalize(
    provider: VcsProvider,
    event_type: &str,
    body: &[u8],
) -> Result<Option<NormalizedEvent>, WebhookError> {
    let Some((_, _, normalizer)) = NORMALIZERS
        .iter()
        .find(|(p, name, _)| *p == provider && *name == event_type)
    else {
        return Ok(None);
    };
    let payload: Value = serde_json::from_slice(body).map_err(|err| WebhookError::Malformed {
        message: err.to_string(),
    })?;
    normalizer(&payload)
}

/// Validates a GitHub `X-Hub-Signature-256` header.
pub fn verify_github_signature(
    secret: &str,
    body: &[u8],
    signature: &str,
) -> Result<(), WebhookError> {
    let hex_sig = signature.strip_prefix("sha256=").unwrap_or(signature);
    let expected = hex::decode(hex_sig).map_err(|_| WebhookError::BadSignature)?;
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| WebhookError::BadSignature)?;
    mac.update(body);
    mac.verify_slice(&expected)
        .map_err(|_| WebhookError::BadSignature)
}

/// GitLab sends the shared secret verbatim in `X-Gitlab-Token`.
pub fn verify_gitlab_token(secret: &str, token: &str) -> Result<(), WebhookError> {
    let matches = secret.len() == token.len()
        && secret
            .bytes()
            .zip(token.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0;
    if matches {
        Ok(())
    } else {
        Err(WebhookError::BadSignature)
    }
}

fn required<'a>(payload: &'a Value, pointer: &str) -> Result<&'a Value, WebhookError> {
    payload
        .pointer(pointer)
        .filter(|value| !value.is_null())
        .ok_or_else(|| WebhookError::Malformed {
            message: format!("missing field {pointer}"),
        })
}

fn required_str(payload: &Value, pointer: &str) -> Result<String, WebhookError> {
    required(payload, pointer)?
        .as_str()
        .map(ToString::to_string)
        .ok_or_else(|| WebhookError::Malformed {
            message: format!("field {pointer} is not a string"),
        })
}

fn required_i64(payload: &Value, pointer: &str) -> Result<i64, WebhookError> {
    required(payload, pointer)?
        .as_i64()
        .ok_or_else(|| WebhookError::Malformed {
            message: format!("field {pointer} is not a number"),
        })
}

fn optional_str(payload: &Value, pointer: &str) -> Option<String> {
    payload
        .pointer(pointer)
        .and_then(Value::as_str)
        .filter(|value| !value.is_empty())
        .map(ToString::to_string)
}

fn id_string(payload: &Value, pointer: &str) -> Result<String, WebhookError> {
    match required(payload, pointer)? {
        Value::String(value) => Ok(value.clone()),
        Value::Number(value) => Ok(value.to_string()),
        _ => Err(WebhookError::Malformed {
            message: format!("field {pointer} is not an id"),
        }),
    }
}

fn is_zero_sha(sha: &str) -> bool {
    !sha.is_empty() && sha.bytes().all(|b| b == b'0')
}

fn empty(provider: VcsProvider, kind: EventKind, repo_full_name: String) -> NormalizedEvent {
    NormalizedEvent {
        provider,
        kind,
        repo_full_name,
        pr_number: None,
        source_branch: None,
        target_branch: None,
        commit_hash: None,
        merge_commit: None,
        comment: None,
        actor: None,
    }
}

fn comment_event(
    provider: VcsProvider,
    repo_full_name: String,
    pr_number: i64,
    body: &str,
    comment_id: String,
    author: Option<String>,
) -> Option<NormalizedEvent> {
    let (command, args) = parse_directive(body)?;
    let mut event = empty(provider, EventKind::CommentCommand, repo_full_name);
    event.pr_number = Some(pr_number);
    event.actor.clone_from(&author);
    event.comment = Some(CommentDirective {
        command,
        args,
        comment_id,
        author,
    });
    Some(event)
}

fn github_pull_request(payload: &Value) -> Result<Option<NormalizedEvent>, WebhookError> {
    let action = required_str(payload, "/action")?;
    let merged = payload
        .pointer("/pull_request/merged")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let kind = match action.as_str() {
        "opened" | "reopened" | "synchronize" | "ready_for_review" => EventKind::PullRequestUpdated,
        "closed" if merged => EventKind::PullRequestMerged,
        _ => return Ok(None),
    };
    let mut event = empty(
        VcsProvider::Github,
        kind,
        required_str(payload, "/repository/full_name")?,
    );
    event.pr_number = Some(required_i64(payload, "/pull_request/number")?);
    event.source_branch = Some(required_str(payload, "/pull_request/head/ref")?);
    event.target_branch = Some(required_str(payload, "/pull_request/base/ref")?);
    event.commit_hash = Some(required_str(payload, "/pull_request/head/sha")?);
    event.merge_commit = optional_str(payload, "/pull_request/merge_commit_sha");
    event.actor = optional_str(payload, "/sender/login");
    Ok(Some(event))
}

fn github_push(payload: &Value) -> Result<Option<NormalizedEvent>, WebhookError> {
    let git_ref = required_str(payload, "/ref")?;
    let Some(branch) = git_ref.strip_prefix("refs/heads/") else {
        return Ok(None);
    };
    let deleted = payload
        .pointer("/deleted")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let kind = if deleted {
        EventKind::BranchDeleted
    } else {
        EventKind::Push
    };
    let mut event = empty(
        VcsProvider::Github,
        kind,
        required_str(payload, "/repository/full_name")?,
    );
    event.source_branch = Some(branch.to_string());
    if !deleted {
        event.commit_hash = Some(required_str(payload, "/after")?);
    }
    event.actor = optional_str(payload, "/pusher/name");
    Ok(Some(event))
}

fn github_delete(payload: &Value) -> Result<Option<NormalizedEvent>, WebhookError> {
    if optional_str(payload, "/ref_type").as_deref() != Some("branch") {
        return Ok(None);
    }
    let mut event = empty(
        VcsProvider::Github,
        EventKind::BranchDeleted,
        required_str(payload, "/repository/full_name")?,
    );
    event.source_branch = Some(required_str(payload, "/ref")?);
    event.actor = optional_str(payload, "/sender/login");
    Ok(Some(event))
}

fn github_issue_comment(payload: &Value) -> Result<Option<NormalizedEvent>, WebhookError> {
    if optional_str(payload, "/action").as_deref() != Some("created")
        || payload.pointer("/issue/pull_request").is_none()
    {
        return Ok(None);
    }
    let body = required_str(payload, "/comment/body")?;
    Ok(comment_event(
        VcsProvider::Github,
        required_str(payload, "/repository/full_name")?,
        required_i64(payload, "/issue/number")?,
        &body,
        id_string(payload, "/comment/id")?,
        optional_str(payload, "/comment/user/login"),
    ))
}

fn gitlab_merge_request(payload: &Value) -> Result<Option<NormalizedEvent>, WebhookError> {
    let action = optional_str(payload, "/object_attributes/action").unwrap_or_default();
    let kind = match action.as_str() {
        "open" | "reopen" | "update" => EventKind::PullRequestUpdated,
        "merge" => EventKind::PullRequestMerged,
        _ => return Ok(None),
    };
    let mut event = empty(
        VcsProvider::Gitlab,
        kind,
        required_str(payload, "/project/path_with_namespace")?,
    );
    event.pr_number = Some(required_i64(payload, "/object_attributes/iid")?);
    event.source_branch = Some(required_str(payload, "/object_attributes/source_branch")?);
    event.target_branch = Some(required_str(payload, "/object_attributes/target_branch")?);
    event.commit_hash = Some(required_str(payload, "/object_attributes/last_commit/id")?);
    event.merge_commit = optional_str(payload, "/object_attributes/merge_commit_sha");
    event.actor = optional_str(payload, "/user/username");
    Ok(Some(event))
}

fn gitlab_push(payload: &Value) -> Result<Option<NormalizedEvent>, WebhookError> {
    let git_ref = required_str(payload, "/ref")?;
    let Some(branch) = git_ref.strip_prefix("refs/heads/") else {
        return Ok(None);
    };
    let after = required_str(payload, "/after")?;
    let deleted = is_zero_sha(&after);
    let kind = if deleted {
        EventKind::BranchDeleted
    } else {
        EventKind::Push
    };
    let mut event = empty(
        VcsProvider::Gitlab,
        kind,
        required_str(payload, "/project/path_with_namespace")?,
    );
    event.source_branch = Some(branch.to_string());
    if !deleted {
        event.commit_hash = Some(after);
    }
    event.actor = optional_str(payload, "/user_username");
    Ok(Some(event))
}

fn gitlab_note(payload: &Value) -> Result<Option<NormalizedEvent>, WebhookError> {
    if optional_str(payload, "/object_attributes/noteable_type").as_deref()
        != Some("MergeRequest")
    {
        return Ok(None);
    }
    let body = required_str(payload, "/object_attributes/note")?;
    let Some(mut event) = comment_event(
        VcsProvider::Gitlab,
        required_str(payload, "/project/path_with_namespace")?,
        required_i64(payload, "/merge_request/iid")?,
        &body,
        id_string(payload, "/object_attributes/id")?,
        optional_str(payload, "/user/username"),
    ) else {
        return Ok(None);
    };
    event.source_branch = optional_str(payload, "/merge_request/source_branch");
    event.target_branch = optional_str(payload, "/merge_request/target_branch");
    event.commit_hash = optional_str(payload, "/merge_request/last_commit/id");
    Ok(Some(event))
}

fn bitbucket_pull_request_event(
    payload: &Value,
    kind: EventKind,
) -> Result<NormalizedEvent, WebhookError> {
    let mut event = empty(
        VcsProvider::Bitbucket,
        kind,
        required_str(payload, "/repository/full_name")?,
    );
    event.pr_number = Some(required_i64(payload, "/pullrequest/id")?);
    event.source_branch = Some(required_str(payload, "/pullrequest/source/branch/name")?);
    event.target_branch = Some(required_str(
        payload,
        "/pullrequest/destination/branch/name",
    )?);
    event.commit_hash = Some(required_str(payload, "/pullrequest/source/commit/hash")?);
    event.merge_commit = optional_str(payload, "/pullrequest/merge_commit/hash");
    event.actor = optional_str(payload, "/actor/nickname");
    Ok(event)
}

fn bitbucket_pull_request(payload: &Value) -> Result<Option<NormalizedEvent>, WebhookError> {
    bitbucket_pull_request_event(payload, EventKind::PullRequestUpdated).map(Some)
}

fn bitbucket_merged(payload: &Value) -> Result<Option<NormalizedEvent>, WebhookError> {
    bitbucket_pull_request_event(payload, EventKind::PullRequestMerged).map(Some)
}

fn bitbucket_push(payload: &Value) -> Result<Option<NormalizedEvent>, WebhookError> {
    let change = required(payload, "/push/changes/0")?;
    let repo_full_name = required_str(payload, "/repository/full_name")?;
    let actor = optional_str(payload, "/actor/nickname");
    let new_ref = change.get("new").filter(|value| !value.is_null());
    let event = match new_ref {
        Some(new_ref) => {
            if optional_str(new_ref, "/type").as_deref() != Some("branch") {
                return Ok(None);
            }
            let mut event = empty(VcsProvider::Bitbucket, EventKind::Push, repo_full_name);
            event.source_branch = Some(required_str(new_ref, "/name")?);
            event.commit_hash = Some(required_str(new_ref, "/target/hash")?);
            event
        }
        None => {
            let mut event = empty(
                VcsProvider::Bitbucket,
                EventKind::BranchDeleted,
                repo_full_name,
            );
            event.source_branch = Some(required_str(change, "/old/name")?);
            event
        }
    };
    Ok(Some(NormalizedEvent { actor, ..event }))
}

fn bitbucket_comment(payload: &Value) -> Result<Option<NormalizedEvent>, WebhookError> {
    let body = required_str(payload, "/comment/content/raw")?;
    let Some(mut event) = comment_event(
        VcsProvider::Bitbucket,
        required_str(payload, "/repository/full_name")?,
        required_i64(payload, "/pullrequest/id")?,
        &body,
        id_string(payload, "/comment/id")?,
        optional_str(payload, "/actor/nickname"),
    ) else {
        return Ok(None);
    };
    event.source_branch = optional_str(payload, "/pullrequest/source/branch/name");
    event.target_branch = optional_str(payload, "/pullrequest/destination/branch/name");
    event.commit_hash = optional_str(payload, "/pullrequest/source/commit/hash");
    Ok(Some(event))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CommandKind;
    use serde_json::json;

    fn bytes(value: &Value) -> Vec<u8> {
        serde_json::to_vec(value).unwrap()
    }

    #[test]
    fn test_github_pull_request_synchronize() {
        let payload = json!({
            "action": "synchronize",
            "repository": { "full_name": "acme/api" },
            "sender": { "login": "dev" },
            "pull_request": {
                "number": 7,
                "merged": false,
                "head": { "ref": "feature/x", "sha": "abc" },
                "base": { "ref": "main" }
            }
        });
        let event = normalize(VcsProvider::Github, "pull_request", &bytes(&payload))
            .unwrap()
            .unwrap();
        assert_eq!(event.kind, EventKind::PullRequestUpdated);
        assert_eq!(event.pr_number, Some(7));
        assert_eq!(event.routing_branch(), Some("main"));
        assert_eq!(event.commit_hash.as_deref(), Some("abc"));
    }

    #[test]
    fn test_github_closed_without_merge_is_ignored() {
        let payload = json!({
            "action": "closed",
            "pull_request": { "merged": false }
        });
        let event = normalize(VcsProvider::Github, "pull_request", &bytes(&payload)).unwrap();
        assert!(event.is_none());
    }

    #[test]
    fn test_github_merged_pull_request() {
        let payload = json!({
            "action": "closed",
            "repository": { "full_name": "acme/api" },
            "pull_request": {
                "number": 9,
                "merged": true,
                "merge_commit_sha": "m1",
                "head": { "ref": "feature/y", "sha": "h1" },
                "base": { "ref": "main" }
            }
        });
        let event = normalize(VcsProvider::Github, "pull_request", &bytes(&payload))
            .unwrap()
            .unwrap();
        assert_eq!(event.kind, EventKind::PullRequestMerged);
        assert_eq!(event.merge_commit.as_deref(), Some("m1"));
    }

    #[test]
    fn test_github_missing_fields_is_malformed() {
        let payload = json!({
            "action": "opened",
            "repository": { "full_name": "acme/api" },
            "pull_request": { "number": 1 }
        });
        let err = normalize(VcsProvider::Github, "pull_request", &bytes(&payload)).unwrap_err();
        assert!(matches!(err, WebhookError::Malformed { .. }));
    }

    #[test]
    fn test_invalid_json_is_malformed() {
        let err = normalize(VcsProvider::Github, "push", b"{not json").unwrap_err();
        assert!(matches!(err, WebhookError::Malformed { .. }));
    }

    #[test]
    fn test_unknown_event_type_is_ignored() {
        let event = normalize(VcsProvider::Github, "star", b"{not json").unwrap();
        assert!(event.is_none());
    }

    #[test]
    fn test_github_push_and_deletion() {
        let push = json!({
            "ref": "refs/heads/main",
            "after": "c1",
            "repository": { "full_name": "acme/api" }
        });
        let event = normalize(VcsProvider::Github, "push", &bytes(&push))
            .unwrap()
            .unwrap();
        assert_eq!(event.kind, EventKind::Push);
        assert_eq!(event.routing_branch(), Some("main"));

        let deleted = json!({
            "ref": "refs/heads/feature/x",
            "after": "0000000000000000000000000000000000000000",
            "deleted": true,
            "repository": { "full_name": "acme/api" }
        });
        let event = normalize(VcsProvider::Github, "push", &bytes(&deleted))
            .unwrap()
            .unwrap();
        assert_eq!(event.kind, EventKind::BranchDeleted);
        assert_eq!(event.commit_hash, None);
    }

    #[test]
    fn test_github_tag_push_is_ignored() {
        let push = json!({ "ref": "refs/tags/v1", "after": "c1" });
        assert!(
            normalize(VcsProvider::Github, "push", &bytes(&push))
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn test_github_comment_command() {
        let payload = json!({
            "action": "created",
            "repository": { "full_name": "acme/api" },
            "issue": { "number": 4, "pull_request": {} },
            "comment": { "id": 991, "body": "/codecrow ask is this safe?", "user": { "login": "rev" } }
        });
        let event = normalize(VcsProvider::Github, "issue_comment", &bytes(&payload))
            .unwrap()
            .unwrap();
        let comment = event.comment.unwrap();
        assert_eq!(comment.command, CommandKind::Ask);
        assert_eq!(comment.args.as_deref(), Some("is this safe?"));
        assert_eq!(comment.comment_id, "991");
        assert_eq!(comment.author.as_deref(), Some("rev"));
    }

    #[test]
    fn test_github_plain_comment_is_ignored() {
        let payload = json!({
            "action": "created",
            "repository": { "full_name": "acme/api" },
            "issue": { "number": 4, "pull_request": {} },
            "comment": { "id": 1, "body": "lgtm" }
        });
        assert!(
            normalize(VcsProvider::Github, "issue_comment", &bytes(&payload))
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn test_gitlab_push_with_zero_sha_deletes_branch() {
        let payload = json!({
            "ref": "refs/heads/feature/z",
            "after": "0000000000000000000000000000000000000000",
            "project": { "path_with_namespace": "acme/web" }
        });
        let event = normalize(VcsProvider::Gitlab, "Push Hook", &bytes(&payload))
            .unwrap()
            .unwrap();
        assert_eq!(event.kind, EventKind::BranchDeleted);
        assert_eq!(event.source_branch.as_deref(), Some("feature/z"));
    }

    #[test]
    fn test_gitlab_merge_request_merge() {
        let payload = json!({
            "project": { "path_with_namespace": "acme/web" },
            "object_attributes": {
                "action": "merge",
                "iid": 12,
                "source_branch": "feature/a",
                "target_branch": "main",
                "last_commit": { "id": "l1" },
                "merge_commit_sha": "m2"
            }
        });
        let event = normalize(VcsProvider::Gitlab, "Merge Request Hook", &bytes(&payload))
            .unwrap()
            .unwrap();
        assert_eq!(event.kind, EventKind::PullRequestMerged);
        assert_eq!(event.pr_number, Some(12));
    }

    #[test]
    fn test_bitbucket_push_and_delete() {
        let push = json!({
            "repository": { "full_name": "acme/svc" },
            "push": { "changes": [ { "new": { "type": "branch", "name": "dev", "target": { "hash": "b1" } } } ] }
        });
        let event = normalize(VcsProvider::Bitbucket, "repo:push", &bytes(&push))
            .unwrap()
            .unwrap();
        assert_eq!(event.kind, EventKind::Push);
        assert_eq!(event.commit_hash.as_deref(), Some("b1"));

        let deleted = json!({
            "repository": { "full_name": "acme/svc" },
            "push": { "changes": [ { "new": null, "old": { "type": "branch", "name": "dev" } } ] }
        });
        let event = normalize(VcsProvider::Bitbucket, "repo:push", &bytes(&deleted))
            .unwrap()
            .unwrap();
        assert_eq!(event.kind, EventKind::BranchDeleted);
        assert_eq!(event.source_branch.as_deref(), Some("dev"));
    }

    #[test]
    fn test_github_signature() {
        let body = b"{\"zen\":\"hi\"}";
        let mut mac = HmacSha256::new_from_slice(b"s3cret").unwrap();
        mac.update(body);
        let signature = format!("sha256={}", hex::encode(mac.finalize().into_bytes()));
        assert!(verify_github_signature("s3cret", body, &signature).is_ok());
        assert!(verify_github_signature("other", body, &signature).is_err());
        assert!(verify_github_signature("s3cret", body, "sha256=zz").is_err());
    }

    #[test]
    fn test_gitlab_token() {
        assert!(verify_gitlab_token("tok", "tok").is_ok());
        assert!(verify_gitlab_token("tok", "tok2").is_err());
    }
}
