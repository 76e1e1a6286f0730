use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
pub struct DiscussionNote {
    pub id: i64,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub discussion_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MergeRequestDetails {
    pub iid: i64,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub source_branch: String,
    pub target_branch: String,
    #[serde(default)]
    pub web_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BranchSummary {
    pub name: String,
}

/// Position of an inline discussion comment on a merge-request diff, per
/// SPEC_FULL.md section 6.
#[derive(Debug, Clone, Serialize)]
pub struct InlinePosition {
    pub base_sha: String,
    pub head_sha: String,
    pub start_sha: String,
    pub old_path: String,
    pub new_path: String,
    pub position_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_line: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_line: Option<u32>,
}

impl InlinePosition {
    pub fn text(
        base_sha: impl Into<String>,
        head_sha: impl Into<String>,
        start_sha: impl Into<String>,
        old_path: impl Into<String>,
        new_path: impl Into<String>,
    ) -> Self {
        Self {
            base_sha: base_sha.into(),
            head_sha: head_sha.into(),
            start_sha: start_sha.into(),
            old_path: old_path.into(),
            new_path: new_path.into(),
            position_type: "text".to_string(),
            old_line: None,
            new_line: None,
        }
    }
}
