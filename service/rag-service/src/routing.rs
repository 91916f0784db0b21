//! Routing: one structured LLM call that classifies a user turn (business?
//! which department? clarification needed?), post-validated against the
//! known department codes. Classification failures never surface as errors;
//! they collapse into the safe default of "treat as business, ask one
//! clarifying question".

use std::sync::Arc;

use llm_provider::{LlmProvider, PromptMessage};
use rag_model::{RoutingDecision, UNKNOWN_DEPARTMENT};
use serde_json::json;

const PARSE_FAILURE_QUESTION: &str =
    "どの手続き・制度・トピックに関する問い合わせか、具体名を1つ教えてください。";
const TRANSPORT_FAILURE_QUESTION: &str =
    "通信/内部エラーが発生しました。もう一度お試しください。";

pub const MAX_SECONDARY_DEPARTMENTS: usize = 2;

/// Seam the chat pipeline depends on; implemented by [`RoutingService`] and
/// by stubs in tests.
pub trait Router: Send + Sync {
    fn route(
        &self,
        user_text: &str,
        department_codes: &[String],
        session_context: Option<&str>,
    ) -> RoutingDecision;
}

pub struct RoutingService {
    llm: Arc<dyn LlmProvider>,
}

impl RoutingService {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self { llm }
    }

    fn decision_schema() -> serde_json::Value {
        json!({
            "type": "object",
            "additionalProperties": false,
            "properties": {
                "is_business": { "type": "boolean" },
                "business_confidence": { "type": "number", "minimum": 0.0, "maximum": 1.0 },
                "primary_department": { "type": "string" },
                "department_confidence": { "type": "number", "minimum": 0.0, "maximum": 1.0 },
                "secondary_departments": { "type": "array", "items": { "type": "string" } },
                "needs_clarification": { "type": "boolean" },
                "clarifying_question": { "type": "string" }
            },
            "required": [
                "is_business",
                "business_confidence",
                "primary_department",
                "department_confidence",
                "secondary_departments",
                "needs_clarification",
                "clarifying_question"
            ]
        })
    }

    fn instructions(dept_codes: &[String]) -> String {
        let dept_hint = if dept_codes.is_empty() {
            "(none)".to_string()
        } else {
            dept_codes.join(", ")
        };
        format!(
            "あなたは社内問い合わせ回答アシスタントのルーティング担当です。\n\
             次のJSONスキーマに厳密に従って出力してください。\n\
             判定の方針:\n\
             - 業務かどうか曖昧なら is_business は true 寄りにする\n\
             - ただし曖昧で誤回答リスクが高い場合は needs_clarification=true にし、clarifying_question を1つだけ作る\n\
             - primary_department は必ず部門コードで返す（不明なら unknown）\n\
             - secondary_departments は最大2つ程度まで（不要なら空配列）\n\
             \n\
             利用可能な部門コード一覧: {dept_hint}\n"
        )
    }

    /// Schema invariants the provider cannot be trusted to hold.
    fn is_consistent(decision: &RoutingDecision) -> bool {
        if decision.needs_clarification && decision.clarifying_question.trim().is_empty() {
            return false;
        }
        !decision.primary_department.trim().is_empty()
    }
}

/// Enforce the department-code constraints on a parsed decision. Applying
/// this twice is the same as applying it once.
pub fn post_validate(mut decision: RoutingDecision, dept_codes: &[String]) -> RoutingDecision {
    decision.business_confidence = decision.business_confidence.clamp(0.0, 1.0);
    decision.department_confidence = decision.department_confidence.clamp(0.0, 1.0);

    if decision.primary_department != UNKNOWN_DEPARTMENT
        && !dept_codes.is_empty()
        && !dept_codes.contains(&decision.primary_department)
    {
        decision.needs_clarification = true;
        decision.clarifying_question = format!(
            "どの部門の内容に近いですか？次から選んでください: {}",
            dept_codes.join(", ")
        );
        decision.primary_department = UNKNOWN_DEPARTMENT.to_string();
        decision.department_confidence = 0.0;
        decision.secondary_departments.clear();
        return decision;
    }

    let mut seen: Vec<String> = Vec::new();
    for code in decision.secondary_departments.drain(..) {
        if code.is_empty() || code == decision.primary_department || seen.contains(&code) {
            continue;
        }
        if !dept_codes.is_empty() && !dept_codes.contains(&code) {
            continue;
        }
        seen.push(code);
        if seen.len() == MAX_SECONDARY_DEPARTMENTS {
            break;
        }
    }
    decision.secondary_departments = seen;
    decision
}

impl Router for RoutingService {
    fn route(
        &self,
        user_text: &str,
        department_codes: &[String],
        session_context: Option<&str>,
    ) -> RoutingDecision {
        let mut dept_codes: Vec<String> = department_codes
            .iter()
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .collect();
        dept_codes.sort();
        dept_codes.dedup();

        let user_payload = match session_context {
            Some(ctx) if !ctx.is_empty() => {
                format!("ユーザの質問:\n{user_text}\n\n直近文脈(要約):\n{ctx}\n")
            }
            _ => format!("ユーザの質問:\n{user_text}\n"),
        };
        let messages = [
            PromptMessage::system(Self::instructions(&dept_codes)),
            PromptMessage::user(user_payload),
        ];

        let value = match self.llm.parse_structured(
            "routing_decision",
            &Self::decision_schema(),
            &messages,
        ) {
            Ok(value) => value,
            Err(err) => {
                tracing::error!(error = %err, "routing call failed, using safe default");
                return RoutingDecision::safe_default(TRANSPORT_FAILURE_QUESTION);
            }
        };

        match serde_json::from_value::<RoutingDecision>(value) {
            Ok(decision) if Self::is_consistent(&decision) => {
                post_validate(decision, &dept_codes)
            }
            Ok(_) | Err(_) => {
                tracing::warn!("routing response failed validation, using safe default");
                RoutingDecision::safe_default(PARSE_FAILURE_QUESTION)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use llm_provider::ProviderError;

    fn codes(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn decision(primary: &str, secondary: &[&str]) -> RoutingDecision {
        RoutingDecision {
            is_business: true,
            business_confidence: 0.9,
            primary_department: primary.to_string(),
            department_confidence: 0.8,
            secondary_departments: secondary.iter().map(|s| s.to_string()).collect(),
            needs_clarification: false,
            clarifying_question: String::new(),
        }
    }

    #[test]
    fn unknown_primary_code_forces_clarification() {
        let out = post_validate(decision("sales", &["hr"]), &codes(&["hr", "finance"]));
        assert_eq!(out.primary_department, "unknown");
        assert_eq!(out.department_confidence, 0.0);
        assert!(out.needs_clarification);
        assert!(out.clarifying_question.contains("hr, finance"));
        assert!(out.secondary_departments.is_empty());
    }

    #[test]
    fn secondaries_are_filtered_deduped_and_capped() {
        let out = post_validate(
            decision("finance", &["finance", "hr", "hr", "ghost", "it", "legal"]),
            &codes(&["finance", "hr", "it", "legal"]),
        );
        assert_eq!(out.secondary_departments, vec!["hr", "it"]);
    }

    #[test]
    fn post_validation_is_a_fixpoint() {
        let cases = vec![
            decision("sales", &["hr"]),
            decision("finance", &["hr", "it", "legal"]),
            decision("unknown", &[]),
        ];
        let known = codes(&["finance", "hr", "it", "legal"]);
        for case in cases {
            let once = post_validate(case, &known);
            let twice = post_validate(once.clone(), &known);
            assert_eq!(once, twice);
        }
    }

    struct StubLlm {
        response: Result<serde_json::Value, ()>,
    }

    impl llm_provider::LlmProvider for StubLlm {
        fn complete(&self, _prompt: &str) -> Result<String, ProviderError> {
            unreachable!("routing never calls complete")
        }

        fn parse_structured(
            &self,
            _schema_name: &str,
            _schema: &serde_json::Value,
            _messages: &[PromptMessage],
        ) -> Result<serde_json::Value, ProviderError> {
            match &self.response {
                Ok(v) => Ok(v.clone()),
                Err(()) => Err(ProviderError::Transport("connection refused".into())),
            }
        }
    }

    #[test]
    fn malformed_response_becomes_the_safe_default() {
        let service = RoutingService::new(Arc::new(StubLlm {
            response: Ok(serde_json::json!({"is_business": "yes"})),
        }));
        let out = service.route("経費について", &codes(&["finance"]), None);
        assert!(out.is_business);
        assert!(out.needs_clarification);
        assert_eq!(out.primary_department, "unknown");
        assert_eq!(out.clarifying_question, PARSE_FAILURE_QUESTION);
    }

    #[test]
    fn clarification_without_a_question_is_rejected() {
        let service = RoutingService::new(Arc::new(StubLlm {
            response: Ok(serde_json::json!({
                "is_business": true,
                "business_confidence": 0.9,
                "primary_department": "finance",
                "department_confidence": 0.9,
                "secondary_departments": [],
                "needs_clarification": true,
                "clarifying_question": "  "
            })),
        }));
        let out = service.route("経費について", &codes(&["finance"]), None);
        assert_eq!(out.clarifying_question, PARSE_FAILURE_QUESTION);
    }

    #[test]
    fn transport_failure_gets_the_network_clarification() {
        let service = RoutingService::new(Arc::new(StubLlm { response: Err(()) }));
        let out = service.route("経費について", &codes(&["finance"]), None);
        assert!(out.is_business);
        assert!(out.needs_clarification);
        assert_eq!(out.clarifying_question, TRANSPORT_FAILURE_QUESTION);
    }

    #[test]
    fn valid_response_passes_through_post_validation() {
        let service = RoutingService::new(Arc::new(StubLlm {
            response: Ok(serde_json::json!({
                "is_business": true,
                "business_confidence": 0.95,
                "primary_department": "finance",
                "department_confidence": 0.9,
                "secondary_departments": ["hr", "ghost"],
                "needs_clarification": false,
                "clarifying_question": ""
            })),
        }));
        let out = service.route("経費精算の締め日は？", &codes(&["finance", "hr"]), Some("直近の話題"));
        assert_eq!(out.primary_department, "finance");
        assert_eq!(out.secondary_departments, vec!["hr"]);
        assert!(!out.needs_clarification);
    }
}
