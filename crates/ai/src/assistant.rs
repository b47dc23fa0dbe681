//! Conversational helper boundary.
//!
//! The helper is a black box: it receives a read-only text snapshot of the
//! catalog, staff and areas plus the user's question, and answers in free text
//! with optional web citations. No concrete model client lives in this crate.

use serde::{Deserialize, Serialize};

use smartmaint_core::{Area, Employee, Product};

use crate::error::AiError;

/// A cited source attached to an answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    pub title: String,
    pub uri: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssistantReply {
    pub text: String,
    #[serde(default)]
    pub sources: Vec<Citation>,
}

/// Read-only snapshot handed to the assistant.
#[derive(Debug, Clone, Copy)]
pub struct InventoryContext<'a> {
    pub products: &'a [Product],
    pub employees: &'a [Employee],
    pub areas: &'a [Area],
}

impl<'a> InventoryContext<'a> {
    pub fn from_snapshot(products: &'a [Product], employees: &'a [Employee], areas: &'a [Area]) -> Self {
        Self {
            products,
            employees,
            areas,
        }
    }

    /// Plain-text rendering used as model context.
    pub fn render(&self) -> String {
        let mut out = String::from("CURRENT INVENTORY DATA:\n\nPRODUCTS:\n");
        for p in self.products {
            out.push_str(&format!(
                "- {} ({}): {} {} (min: {}) - class: {}\n",
                p.name, p.brand, p.stock, p.unit, p.min_stock, p.classification
            ));
        }

        out.push_str("\nEMPLOYEES:\n");
        for e in self.employees {
            out.push_str(&format!("- {}: areas {}\n", e.name, e.areas.join(", ")));
        }

        let areas: Vec<&str> = self.areas.iter().map(|a| a.name.as_str()).collect();
        out.push_str("\nAREAS:\n");
        out.push_str(&areas.join(", "));
        out.push('\n');
        out
    }
}

/// Answers free-text questions about the current inventory.
#[async_trait::async_trait]
pub trait Assistant: Send + Sync {
    async fn ask(&self, context: InventoryContext<'_>, query: &str) -> Result<AssistantReply, AiError>;
}
