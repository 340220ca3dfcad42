use super::{ChatError, ValidationError};
use crate::api::types::Holding;
use crate::api::{Portfolio, QueryBackend};
use std::collections::HashMap;

/// One slice of an allocation chart.
#[derive(Debug, Clone, PartialEq)]
pub struct AllocationSlice {
    pub label: String,
    pub value: f64,
    pub weight: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PortfolioSummary {
    pub client_id: String,
    pub total_holdings: usize,
    pub total_cost_basis: f64,
    pub by_asset_class: Vec<AllocationSlice>,
    pub by_sector: Vec<AllocationSlice>,
}

/// Client ids look like `CLT-001`.
pub fn is_valid_client_id(client_id: &str) -> bool {
    client_id
        .strip_prefix("CLT-")
        .is_some_and(|digits| digits.len() == 3 && digits.bytes().all(|b| b.is_ascii_digit()))
}

pub async fn fetch_portfolio(
    backend: &dyn QueryBackend,
    client_id: &str,
) -> Result<Portfolio, ChatError> {
    if !is_valid_client_id(client_id) {
        return Err(ValidationError::InvalidClientId(client_id.to_string()).into());
    }
    let portfolio = backend.fetch_portfolio(client_id).await?;
    tracing::debug!(client_id, holdings = portfolio.holdings.len(), "portfolio loaded");
    Ok(portfolio)
}

fn cost_basis(holding: &Holding) -> f64 {
    holding.quantity * holding.purchase_price
}

fn allocation<'a>(
    holdings: &'a [Holding],
    key: impl Fn(&'a Holding) -> &'a str,
    total: f64,
) -> Vec<AllocationSlice> {
    let mut buckets: HashMap<&str, f64> = HashMap::new();
    for holding in holdings {
        let label = match key(holding).trim() {
            "" => "Other",
            label => label,
        };
        *buckets.entry(label).or_default() += cost_basis(holding);
    }

    let mut slices: Vec<AllocationSlice> = buckets
        .into_iter()
        .map(|(label, value)| AllocationSlice {
            label: label.to_string(),
            value,
            weight: if total > 0.0 { value / total } else { 0.0 },
        })
        .collect();
    slices.sort_by(|a, b| {
        b.value
            .partial_cmp(&a.value)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.label.cmp(&b.label))
    });
    slices
}

/// Aggregate metrics and chart series for a portfolio.
pub fn summarize(portfolio: &Portfolio) -> PortfolioSummary {
    let total_cost_basis: f64 = portfolio.holdings.iter().map(cost_basis).sum();
    PortfolioSummary {
        client_id: portfolio.client_id.clone(),
        total_holdings: portfolio.holdings.len(),
        total_cost_basis,
        by_asset_class: allocation(&portfolio.holdings, |h| h.asset_class.as_str(), total_cost_basis),
        by_sector: allocation(&portfolio.holdings, |h| h.sector.as_str(), total_cost_basis),
    }
}
