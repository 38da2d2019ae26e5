//! Every canonical field resolves through [`ContractField::aliases`]; the
//! first key present wins.

use serde_json::Value;

use crate::config::ContractConfig;
use crate::fields;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContractField {
    Conclusions,
    Clusters,
    EvidenceChain,
    Uncertainties,
    NextSteps,
    Metadata,
    ConclusionId,
    Statement,
    Confidence,
    Rank,
    Decomposition,
    Trigger,
    Supply,
    Amplification,
    ClusterLabel,
    ClusterFrameCount,
    ClusterShare,
    ClusterDescription,
    ClusterFrameRefs,
    ClusterOmitted,
    EvidenceConclusionId,
    EvidenceItems,
    Rounds,
    SceneId,
    ClusterPolicy,
    MaxClusters,
}

impl ContractField {
    pub fn aliases(self) -> &'static [&'static str] {
        match self {
            Self::Conclusions => &[
                "conclusions",
                "ranked_conclusions",
                "rankedConclusions",
                "conclusion",
            ],
            Self::Clusters => &["clusters", "frame_clusters", "frameClusters", "cluster"],
            Self::EvidenceChain => &["evidence_chain", "evidenceChain", "evidence"],
            Self::Uncertainties => &[
                "uncertainties",
                "uncertainty",
                "open_questions",
                "openQuestions",
            ],
            Self::NextSteps => &[
                "next_steps",
                "nextSteps",
                "next_step",
                "nextStep",
                "recommendations",
            ],
            Self::Metadata => &["metadata", "meta"],
            Self::ConclusionId => &["id", "conclusion_id", "conclusionId"],
            Self::Statement => &["statement", "conclusion", "text", "summary", "title"],
            Self::Confidence => &[
                "confidence",
                "confidence_score",
                "confidenceScore",
                "overall_confidence",
                "overallConfidence",
            ],
            Self::Rank => &["rank", "order"],
            Self::Decomposition => &["decomposition", "mechanism", "causal_chain", "causalChain"],
            Self::Trigger => &["trigger", "trigger_factor", "triggerFactor"],
            Self::Supply => &["supply", "supply_constraint", "supplyConstraint"],
            Self::Amplification => &[
                "amplification",
                "amplifier",
                "amplification_path",
                "amplificationPath",
            ],
            Self::ClusterLabel => &["label", "name", "title", "category"],
            Self::ClusterFrameCount => &["frame_count", "frameCount", "count", "size"],
            Self::ClusterShare => &["percentage", "share", "ratio"],
            Self::ClusterDescription => &["description", "summary", "reason"],
            Self::ClusterFrameRefs => &["frame_refs", "frameRefs", "frames", "frame_ids", "frameIds"],
            Self::ClusterOmitted => &[
                "omitted_frames",
                "omittedFrames",
                "omitted_count",
                "omittedCount",
            ],
            Self::EvidenceConclusionId => &["conclusion_id", "conclusionId", "conclusion", "id"],
            Self::EvidenceItems => &["evidence", "items", "evidences", "facts", "text"],
            Self::Rounds => &[
                "rounds",
                "round_count",
                "roundCount",
                "rounds_completed",
                "roundsCompleted",
            ],
            Self::SceneId => &["scene_id", "sceneId", "scene"],
            Self::ClusterPolicy => &["cluster_policy", "clusterPolicy"],
            Self::MaxClusters => &["max_clusters", "maxClusters"],
        }
    }

    pub fn read(self, value: &Value) -> Option<&Value> {
        fields::read_aliased(value, self.aliases())
    }

    fn read_text(self, value: &Value) -> Option<String> {
        self.read(value)
            .and_then(fields::as_text)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    fn read_number(self, value: &Value) -> Option<f64> {
        self.read(value).and_then(fields::as_number)
    }
}

/// Fractions (`<= 1`) are scaled to percent; larger values are already percent.
/// The result is clamped to `0..=100`.
pub fn normalize_confidence(raw: f64) -> f64 {
    let pct = if raw <= 1.0 { raw * 100.0 } else { raw };
    pct.clamp(0.0, 100.0)
}

pub fn format_percent(pct: f64) -> String {
    format!("{}%", pct.round() as i64)
}

#[derive(Debug, Clone, PartialEq)]
pub struct RankedConclusion {
    pub id: Option<String>,
    pub statement: Option<String>,
    pub confidence_pct: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FrameCluster {
    pub label: String,
    pub frame_count: Option<u64>,
    pub share_pct: Option<f64>,
    pub description: Option<String>,
    pub frame_refs: Vec<String>,
    pub omitted_frames: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EvidenceEntry {
    pub conclusion_id: String,
    pub items: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ContractMetadata {
    pub confidence_pct: Option<f64>,
    pub rounds: Option<u64>,
    pub scene_id: Option<String>,
    pub max_clusters: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct NormalizedContract {
    pub conclusions: Vec<RankedConclusion>,
    pub clusters: Vec<FrameCluster>,
    pub clusters_total: usize,
    pub evidence: Vec<EvidenceEntry>,
    pub uncertainties: Vec<String>,
    pub next_steps: Vec<String>,
    pub metadata: ContractMetadata,
}

/// Heuristic used by the completion handler: an object carrying at least one
/// recognised section is treated as a contract.
pub fn looks_like_contract(value: &Value) -> bool {
    value.is_object()
        && [
            ContractField::Conclusions,
            ContractField::Clusters,
            ContractField::EvidenceChain,
            ContractField::Metadata,
        ]
        .into_iter()
        .any(|field| field.read(value).is_some())
}

pub fn normalize(contract: &Value, config: &ContractConfig) -> NormalizedContract {
    let metadata = read_metadata(contract);
    let mut clusters = read_clusters(contract, config.max_frame_refs);
    let clusters_total = clusters.len();
    if let Some(max) = metadata.max_clusters {
        clusters.truncate(max);
    }

    let mut conclusions = read_conclusions(contract);
    conclusions.truncate(config.max_conclusions);

    NormalizedContract {
        conclusions,
        clusters,
        clusters_total,
        evidence: read_evidence(contract),
        uncertainties: read_text_list(contract, ContractField::Uncertainties),
        next_steps: read_text_list(contract, ContractField::NextSteps),
        metadata,
    }
}

pub fn render_contract(contract: &Value, config: &ContractConfig) -> String {
    render(&normalize(contract, config))
}

fn read_conclusions(contract: &Value) -> Vec<RankedConclusion> {
    let items: Vec<&Value> = match ContractField::Conclusions.read(contract) {
        Some(Value::Array(items)) => items.iter().collect(),
        Some(single) => vec![single],
        None => Vec::new(),
    };

    let mut ranked: Vec<(Option<f64>, RankedConclusion)> = items
        .into_iter()
        .filter_map(|item| match item {
            Value::Object(_) => Some((
                ContractField::Rank.read_number(item),
                RankedConclusion {
                    id: ContractField::ConclusionId.read_text(item),
                    statement: ContractField::Statement
                        .read_text(item)
                        .or_else(|| decomposition_statement(item)),
                    confidence_pct: ContractField::Confidence
                        .read_number(item)
                        .map(normalize_confidence),
                },
            )),
            other => fields::as_text(other)
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .map(|statement| {
                    (
                        None,
                        RankedConclusion {
                            id: None,
                            statement: Some(statement),
                            confidence_pct: None,
                        },
                    )
                }),
        })
        .collect();

    // Explicit ranks reorder; unranked entries keep source order after them.
    ranked.sort_by(|(a, _), (b, _)| match (a, b) {
        (Some(a), Some(b)) => a.total_cmp(b),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => std::cmp::Ordering::Equal,
    });
    ranked.into_iter().map(|(_, conclusion)| conclusion).collect()
}

fn decomposition_statement(item: &Value) -> Option<String> {
    let source = ContractField::Decomposition
        .read(item)
        .filter(|v| v.is_object())
        .unwrap_or(item);
    let parts: Vec<String> = [
        (ContractField::Trigger, "触发"),
        (ContractField::Supply, "供给"),
        (ContractField::Amplification, "放大"),
    ]
    .into_iter()
    .filter_map(|(field, label)| {
        field
            .read_text(source)
            .map(|text| format!("{label}: {text}"))
    })
    .collect();

    if parts.is_empty() {
        None
    } else {
        Some(parts.join("；"))
    }
}

fn read_clusters(contract: &Value, max_frame_refs: usize) -> Vec<FrameCluster> {
    let Some(Value::Array(items)) = ContractField::Clusters.read(contract) else {
        return Vec::new();
    };

    items
        .iter()
        .enumerate()
        .map(|(idx, item)| {
            if !item.is_object() {
                return FrameCluster {
                    label: fields::as_text(item).unwrap_or_else(|| format!("聚类 {}", idx + 1)),
                    frame_count: None,
                    share_pct: None,
                    description: None,
                    frame_refs: Vec::new(),
                    omitted_frames: 0,
                };
            }
            let refs: Vec<String> = match ContractField::ClusterFrameRefs.read(item) {
                Some(Value::Array(refs)) => refs.iter().filter_map(fields::as_text).collect(),
                _ => Vec::new(),
            };
            let explicit_omitted = ContractField::ClusterOmitted
                .read_number(item)
                .filter(|n| *n > 0.0)
                .map_or(0, |n| n.trunc() as u64);
            let shown: Vec<String> = refs.iter().take(max_frame_refs).cloned().collect();
            let truncated = (refs.len() - shown.len()) as u64;

            FrameCluster {
                label: ContractField::ClusterLabel
                    .read_text(item)
                    .unwrap_or_else(|| format!("聚类 {}", idx + 1)),
                frame_count: ContractField::ClusterFrameCount
                    .read_number(item)
                    .filter(|n| *n >= 0.0)
                    .map(|n| n.trunc() as u64),
                share_pct: ContractField::ClusterShare
                    .read_number(item)
                    .map(normalize_confidence),
                description: ContractField::ClusterDescription.read_text(item),
                frame_refs: shown,
                omitted_frames: explicit_omitted + truncated,
            }
        })
        .collect()
}

fn read_evidence(contract: &Value) -> Vec<EvidenceEntry> {
    match ContractField::EvidenceChain.read(contract) {
        Some(Value::Array(entries)) => entries
            .iter()
            .filter_map(|entry| match entry {
                Value::Object(_) => {
                    let conclusion_id = ContractField::EvidenceConclusionId
                        .read_text(entry)
                        .unwrap_or_else(|| "-".to_string());
                    let items = evidence_items(ContractField::EvidenceItems.read(entry));
                    Some(EvidenceEntry {
                        conclusion_id,
                        items,
                    })
                }
                other => fields::as_text(other).map(|text| EvidenceEntry {
                    conclusion_id: "-".to_string(),
                    items: vec![text],
                }),
            })
            .collect(),
        Some(Value::Object(map)) => map
            .iter()
            .map(|(conclusion_id, items)| EvidenceEntry {
                conclusion_id: conclusion_id.clone(),
                items: evidence_items(Some(items)),
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn evidence_items(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => fields::text_items(items),
        Some(single) => fields::text_items(std::slice::from_ref(single)),
        None => Vec::new(),
    }
}

fn read_text_list(contract: &Value, field: ContractField) -> Vec<String> {
    match field.read(contract) {
        Some(Value::Array(items)) => fields::text_items(items),
        Some(single) => fields::text_items(std::slice::from_ref(single)),
        None => Vec::new(),
    }
}

fn read_metadata(contract: &Value) -> ContractMetadata {
    let meta = ContractField::Metadata
        .read(contract)
        .filter(|v| v.is_object());

    let from_meta_or_root = |field: ContractField| {
        meta.and_then(|m| field.read(m))
            .or_else(|| field.read(contract))
    };

    let max_clusters = [meta, Some(contract)]
        .into_iter()
        .flatten()
        .find_map(|source| {
            ContractField::ClusterPolicy
                .read(source)
                .and_then(|policy| ContractField::MaxClusters.read_number(policy))
                .or_else(|| ContractField::MaxClusters.read_number(source))
        })
        .filter(|n| *n >= 0.0)
        .map(|n| n.trunc() as usize);

    ContractMetadata {
        confidence_pct: from_meta_or_root(ContractField::Confidence)
            .and_then(fields::as_number)
            .map(normalize_confidence),
        rounds: from_meta_or_root(ContractField::Rounds)
            .and_then(fields::as_number)
            .filter(|n| *n >= 0.0)
            .map(|n| n.trunc() as u64),
        scene_id: from_meta_or_root(ContractField::SceneId)
            .and_then(fields::as_text)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty()),
        max_clusters,
    }
}

pub fn cluster_heading(scene_id: Option<&str>) -> &'static str {
    match scene_id.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
        Some("scrolling" | "scroll" | "jank") => "掉帧聚类（先看大头）",
        Some("startup" | "launch" | "cold_start") => "启动阶段聚类（先看大头）",
        Some("anr") => "ANR 聚类（先看大头）",
        Some("interaction" | "click" | "tap") => "交互延迟聚类（先看大头）",
        _ => "问题聚类（先看大头）",
    }
}

pub fn render(contract: &NormalizedContract) -> String {
    let mut out = String::new();

    out.push_str("## 结论（按可能性排序）\n");
    if contract.conclusions.is_empty() {
        out.push_str("- 结论缺失\n");
    }
    for (idx, conclusion) in contract.conclusions.iter().enumerate() {
        let statement = conclusion.statement.as_deref().unwrap_or("结论内容缺失");
        out.push_str(&format!("{}. {}", idx + 1, statement));
        if let Some(pct) = conclusion.confidence_pct {
            out.push_str(&format!("（置信度 {}）", format_percent(pct)));
        }
        out.push('\n');
    }

    out.push_str(&format!(
        "\n## {}\n",
        cluster_heading(contract.metadata.scene_id.as_deref())
    ));
    if contract.clusters_total == 0 {
        out.push_str("- 聚类缺失\n");
    }
    for (idx, cluster) in contract.clusters.iter().enumerate() {
        out.push_str(&format!("{}. **{}**", idx + 1, cluster.label));
        if let Some(count) = cluster.frame_count {
            out.push_str(&format!(" · {count} 帧"));
        }
        if let Some(share) = cluster.share_pct {
            out.push_str(&format!("（{}）", format_percent(share)));
        }
        out.push('\n');
        if let Some(description) = &cluster.description {
            out.push_str(&format!("   {description}\n"));
        }
        if !cluster.frame_refs.is_empty() || cluster.omitted_frames > 0 {
            out.push_str("   帧: ");
            out.push_str(&cluster.frame_refs.join(", "));
            if cluster.omitted_frames > 0 {
                if !cluster.frame_refs.is_empty() {
                    out.push(' ');
                }
                out.push_str(&format!("（另有 {} 帧未展示）", cluster.omitted_frames));
            }
            out.push('\n');
        }
    }
    let hidden = contract.clusters_total.saturating_sub(contract.clusters.len());
    if hidden > 0 {
        out.push_str(&format!("- 其余 {hidden} 个聚类已折叠\n"));
    }

    out.push_str("\n## 证据链\n");
    if contract.evidence.is_empty() {
        out.push_str("- 证据链缺失\n");
    }
    for entry in &contract.evidence {
        out.push_str(&format!("- **{}**\n", entry.conclusion_id));
        if entry.items.is_empty() {
            out.push_str("  - 证据缺失\n");
        }
        for item in &entry.items {
            out.push_str(&format!("  - {item}\n"));
        }
    }

    push_list(&mut out, "不确定性", &contract.uncertainties, "- 不确定性缺失");
    push_list(&mut out, "下一步", &contract.next_steps, "- 下一步缺失");

    out.push_str("\n## 元数据\n");
    let meta = &contract.metadata;
    if meta.confidence_pct.is_none() && meta.rounds.is_none() {
        out.push_str("- 元数据缺失\n");
    }
    if let Some(pct) = meta.confidence_pct {
        out.push_str(&format!("- 置信度: {}\n", format_percent(pct)));
    }
    if let Some(rounds) = meta.rounds {
        out.push_str(&format!("- 分析轮次: {rounds}\n"));
    }

    out.trim_end().to_string()
}

fn push_list(out: &mut String, heading: &str, items: &[String], missing: &str) {
    out.push_str(&format!("\n## {heading}\n"));
    if items.is_empty() {
        out.push_str(missing);
        out.push('\n');
    }
    for item in items {
        out.push_str(&format!("- {item}\n"));
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    fn config() -> ContractConfig {
        ContractConfig::default()
    }

    #[test]
    fn confidence_fraction_and_percent_agree() {
        assert_eq!(normalize_confidence(0.85), 85.0);
        assert_eq!(normalize_confidence(85.0), 85.0);
        assert_eq!(normalize_confidence(1.0), 100.0);
        assert_eq!(normalize_confidence(250.0), 100.0);
        assert_eq!(normalize_confidence(-0.2), 0.0);
    }

    #[test]
    fn snake_and_camel_contracts_normalize_identically() {
        let snake = json!({
            "conclusions": [{ "statement": "RenderThread 阻塞", "confidence": 0.9 }],
            "evidence_chain": [{ "conclusion_id": "c1", "evidence": ["帧 12 超时"] }],
            "next_steps": ["检查 GPU"],
            "metadata": { "confidence": 0.8, "round_count": 2 },
        });
        let camel = json!({
            "rankedConclusions": [{ "text": "RenderThread 阻塞", "confidenceScore": 90 }],
            "evidenceChain": [{ "conclusionId": "c1", "items": ["帧 12 超时"] }],
            "nextSteps": ["检查 GPU"],
            "meta": { "overallConfidence": 80, "roundsCompleted": 2 },
        });
        assert_eq!(normalize(&snake, &config()), normalize(&camel, &config()));
    }

    #[test]
    fn only_top_three_conclusions_render_and_ranks_reorder() {
        let contract = json!({
            "conclusions": [
                { "statement": "d", "rank": 4 },
                { "statement": "b", "rank": 2 },
                { "statement": "a", "rank": 1 },
                { "statement": "c", "rank": 3 },
            ],
        });
        let normalized = normalize(&contract, &config());
        let statements: Vec<_> = normalized
            .conclusions
            .iter()
            .filter_map(|c| c.statement.clone())
            .collect();
        assert_eq!(statements, vec!["a", "b", "c"]);
    }

    #[test]
    fn decomposition_fills_in_missing_statement() {
        let contract = json!({
            "conclusions": [{
                "decomposition": { "trigger": "输入事件", "supply": "CPU 限频", "amplification": "主线程锁" },
            }],
        });
        let normalized = normalize(&contract, &config());
        assert_eq!(
            normalized.conclusions[0].statement.as_deref(),
            Some("触发: 输入事件；供给: CPU 限频；放大: 主线程锁")
        );
    }

    #[test]
    fn cluster_policy_caps_clusters_in_source_order() {
        let contract = json!({
            "clusters": [
                { "label": "c1" }, { "label": "c2" }, { "label": "c3" },
                { "label": "c4" }, { "label": "c5" }, { "label": "c6" },
            ],
            "metadata": { "clusterPolicy": { "maxClusters": 2 } },
        });
        let normalized = normalize(&contract, &config());
        let labels: Vec<_> = normalized.clusters.iter().map(|c| c.label.clone()).collect();
        assert_eq!(labels, vec!["c1", "c2"]);
        assert_eq!(normalized.clusters_total, 6);
        assert!(render(&normalized).contains("其余 4 个聚类已折叠"));
    }

    #[test]
    fn zero_max_clusters_folds_every_cluster() {
        let contract = json!({
            "clusters": [{ "label": "c1" }, { "label": "c2" }],
            "metadata": { "clusterPolicy": { "maxClusters": 0 } },
        });
        let normalized = normalize(&contract, &config());
        assert!(normalized.clusters.is_empty());
        assert_eq!(normalized.clusters_total, 2);

        let rendered = render(&normalized);
        assert!(rendered.contains("- 其余 2 个聚类已折叠"));
        assert!(!rendered.contains("- 聚类缺失"));
        assert!(!rendered.contains("c1"));
    }

    #[test]
    fn frame_refs_beyond_limit_count_as_omitted() {
        let contract = json!({
            "clusters": [{
                "name": "长帧",
                "frameRefs": [1, 2, 3, 4, 5],
                "omittedFrames": 10,
            }],
        });
        let config = ContractConfig {
            max_frame_refs: 3,
            ..ContractConfig::default()
        };
        let normalized = normalize(&contract, &config);
        assert_eq!(normalized.clusters[0].frame_refs, vec!["1", "2", "3"]);
        assert_eq!(normalized.clusters[0].omitted_frames, 12);
        assert!(render(&normalized).contains("帧: 1, 2, 3 （另有 12 帧未展示）"));
    }

    #[test]
    fn scene_id_selects_cluster_heading() {
        let contract = json!({ "metadata": { "sceneId": "scrolling" } });
        assert!(render_contract(&contract, &config()).contains("## 掉帧聚类（先看大头）"));
        let contract = json!({ "metadata": {} });
        assert!(render_contract(&contract, &config()).contains("## 问题聚类（先看大头）"));
    }

    #[test]
    fn empty_contract_renders_every_placeholder() {
        let rendered = render_contract(&json!({}), &config());
        for line in [
            "- 结论缺失",
            "- 聚类缺失",
            "- 证据链缺失",
            "- 不确定性缺失",
            "- 下一步缺失",
            "- 元数据缺失",
        ] {
            assert!(rendered.contains(line), "missing `{line}` in:\n{rendered}");
        }
    }

    #[test]
    fn evidence_chain_keyed_by_conclusion_id_object() {
        let contract = json!({ "evidence": { "c1": ["a", "b"], "c2": "only" } });
        let normalized = normalize(&contract, &config());
        assert_eq!(
            normalized.evidence,
            vec![
                EvidenceEntry {
                    conclusion_id: "c1".into(),
                    items: vec!["a".into(), "b".into()],
                },
                EvidenceEntry {
                    conclusion_id: "c2".into(),
                    items: vec!["only".into()],
                },
            ]
        );
    }

    #[test]
    fn malformed_sections_do_not_panic() {
        let contract = json!({
            "conclusions": 42,
            "clusters": "nope",
            "evidence_chain": 7,
            "uncertainties": { "a": 1 },
            "metadata": [1, 2],
        });
        let rendered = render_contract(&contract, &config());
        assert!(rendered.contains("1. 42"));
        assert!(rendered.contains("- 聚类缺失"));
        assert!(rendered.contains("- 证据链缺失"));
    }

    #[test]
    fn contract_detection_requires_known_section() {
        assert!(looks_like_contract(&json!({ "clusters": [] })));
        assert!(!looks_like_contract(&json!({ "foo": 1 })));
        assert!(!looks_like_contract(&json!("text")));
    }
}
