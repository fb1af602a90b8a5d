use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::base_data::{BaseData, CustomerCategory};
use super::insights::{
    CapacityLevel, CapacityUtilization, ClientRetention, InsightKind, InsightOutcome, PeakHours,
    PricingOpportunity, RevenueTrend, TrendLabel,
};
use crate::models::AgentType;

/// Role-specific slice of the business picture: fixed template copy driven
/// by threshold rules over the base data and insights.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentContext {
    pub agent_type: AgentType,
    pub focus: String,
    pub key_metrics: BTreeMap<String, f64>,
    pub opportunities: Vec<String>,
    pub threats: Vec<String>,
    pub bottlenecks: Vec<String>,
    pub recommendations: Vec<String>,
}

const CANCELLATION_THREAT_PCT: f64 = 15.0;
const NO_SHOW_THREAT_PCT: f64 = 10.0;
const LOW_TICKET: f64 = 50.0;
const CONCENTRATION_PCT: f64 = 40.0;
const LOW_RETENTION_PCT: f64 = 30.0;

type Insights = BTreeMap<InsightKind, InsightOutcome>;

fn revenue_trend(insights: &Insights) -> Option<&RevenueTrend> {
    match insights.get(&InsightKind::RevenueTrend) {
        Some(InsightOutcome::RevenueTrend(v)) => Some(v),
        _ => None,
    }
}

fn retention(insights: &Insights) -> Option<&ClientRetention> {
    match insights.get(&InsightKind::ClientRetention) {
        Some(InsightOutcome::ClientRetention(v)) => Some(v),
        _ => None,
    }
}

fn peak_hours(insights: &Insights) -> Option<&PeakHours> {
    match insights.get(&InsightKind::PeakHours) {
        Some(InsightOutcome::PeakHours(v)) => Some(v),
        _ => None,
    }
}

fn pricing(insights: &Insights) -> Option<&PricingOpportunity> {
    match insights.get(&InsightKind::PricingOpportunity) {
        Some(InsightOutcome::PricingOpportunity(v)) => Some(v),
        _ => None,
    }
}

fn capacity(insights: &Insights) -> Option<&CapacityUtilization> {
    match insights.get(&InsightKind::CapacityUtilization) {
        Some(InsightOutcome::CapacityUtilization(v)) => Some(v),
        _ => None,
    }
}

pub fn generate(
    agent_type: AgentType,
    base: &BaseData,
    insights: &Insights,
    include_recommendations: bool,
) -> AgentContext {
    let mut ctx = match agent_type {
        AgentType::Financial => financial(base, insights),
        AgentType::Operations => operations(base, insights),
        AgentType::ClientAcquisition => client_acquisition(base, insights),
        AgentType::Brand => brand(base, insights),
        AgentType::Growth => growth(base, insights),
    };
    if !include_recommendations {
        ctx.recommendations.clear();
    }
    ctx
}

fn financial(base: &BaseData, insights: &Insights) -> AgentContext {
    let summary = &base.summary;
    let mut key_metrics = BTreeMap::new();
    key_metrics.insert("total_revenue".into(), summary.total_revenue);
    key_metrics.insert("avg_ticket".into(), summary.avg_ticket);
    key_metrics.insert("cancellation_rate".into(), summary.cancellation_rate);

    let mut opportunities = Vec::new();
    let mut threats = Vec::new();
    let mut recommendations = Vec::new();

    if let Some(trend) = revenue_trend(insights) {
        key_metrics.insert("revenue_growth_rate".into(), trend.growth_rate);
        if trend.trend == TrendLabel::Declining {
            threats.push(format!(
                "Revenue is declining {:.1}% week over week.",
                trend.growth_rate.abs()
            ));
            recommendations
                .push("Review recent price or schedule changes before the slide compounds.".into());
        }
    }

    if let Some(pricing) = pricing(insights) {
        for service in &pricing.underpriced {
            opportunities.push(format!(
                "{} averages ${:.0} per visit; a move to ${:.0}-${:.0} is supported.",
                service.name, service.average_ticket, service.suggested_min, service.suggested_max
            ));
        }
    }

    if let Some(top) = base.by_service.first() {
        opportunities.push(format!(
            "{} drives {:.1}% of revenue; protect its availability.",
            top.name, top.share_pct
        ));
    }

    if summary.cancellation_rate > CANCELLATION_THREAT_PCT {
        threats.push(format!(
            "Cancellation rate of {:.1}% is eating booked revenue.",
            summary.cancellation_rate
        ));
        recommendations.push("Require a card on file or deposit for peak-hour slots.".into());
    }
    if summary.avg_ticket > 0.0 && summary.avg_ticket < LOW_TICKET {
        recommendations.push(format!(
            "Average ticket is ${:.0}; raise base prices 10-15% or attach add-ons.",
            summary.avg_ticket
        ));
    }

    AgentContext {
        agent_type: AgentType::Financial,
        focus: "Revenue quality, pricing power, and collection risk".into(),
        key_metrics,
        opportunities,
        threats,
        bottlenecks: Vec::new(),
        recommendations,
    }
}

fn operations(base: &BaseData, insights: &Insights) -> AgentContext {
    let summary = &base.summary;
    let mut key_metrics = BTreeMap::new();
    key_metrics.insert("total_appointments".into(), summary.total_appointments as f64);
    key_metrics.insert("no_show_rate".into(), summary.no_show_rate);

    let mut opportunities = Vec::new();
    let mut threats = Vec::new();
    let mut bottlenecks = Vec::new();
    let mut recommendations = Vec::new();

    if let Some(peaks) = peak_hours(insights) {
        for load in &peaks.busy {
            bottlenecks.push(format!(
                "{:02}:00 carries {} bookings in the window.",
                load.hour, load.appointments
            ));
        }
        for load in &peaks.underutilized {
            opportunities.push(format!(
                "{:02}:00 is underused ({} bookings); steer walk-ins there.",
                load.hour, load.appointments
            ));
        }
        if !peaks.busy.is_empty() {
            recommendations.push("Align staff shifts with the busiest hours.".into());
        }
    }

    if let Some(cap) = capacity(insights) {
        key_metrics.insert("utilization_pct".into(), cap.utilization_pct);
        match cap.level {
            CapacityLevel::Overbooked => threats.push(format!(
                "Chairs are at {:.0}% utilization; service quality is at risk.",
                cap.utilization_pct
            )),
            CapacityLevel::Underutilized => opportunities.push(format!(
                "Only {:.0}% of chair time is booked.",
                cap.utilization_pct
            )),
            CapacityLevel::Healthy => {}
        }
    }

    if summary.no_show_rate > NO_SHOW_THREAT_PCT {
        threats.push(format!(
            "No-show rate of {:.1}% leaves chairs idle.",
            summary.no_show_rate
        ));
        recommendations.push("Turn on day-before and hour-before reminders.".into());
    }

    AgentContext {
        agent_type: AgentType::Operations,
        focus: "Scheduling, staffing, and chair utilization".into(),
        key_metrics,
        opportunities,
        threats,
        bottlenecks,
        recommendations,
    }
}

fn client_acquisition(base: &BaseData, insights: &Insights) -> AgentContext {
    let summary = &base.summary;
    let mut key_metrics = BTreeMap::new();
    key_metrics.insert("unique_clients".into(), summary.unique_clients as f64);

    let one_time = base
        .by_client
        .iter()
        .filter(|c| c.category == CustomerCategory::OneTime)
        .count();
    let one_time_share = if base.by_client.is_empty() {
        0.0
    } else {
        one_time as f64 / base.by_client.len() as f64 * 100.0
    };
    key_metrics.insert("one_time_share_pct".into(), one_time_share);

    let mut opportunities = Vec::new();
    let mut threats = Vec::new();
    let mut recommendations = Vec::new();

    if let Some(retention) = retention(insights) {
        key_metrics.insert("retention_rate".into(), retention.retention_rate);
        if retention.retention_rate < LOW_RETENTION_PCT && retention.total_clients > 0 {
            threats.push(format!(
                "Only {:.1}% of clients come back within the window.",
                retention.retention_rate
            ));
        }
        if !retention.at_risk.is_empty() {
            opportunities.push(format!(
                "{} lapsed clients are reachable for a win-back offer.",
                retention.at_risk.len()
            ));
            recommendations.push("Send a win-back message to clients past 45 days.".into());
        }
    }

    if one_time_share > 50.0 {
        opportunities.push(format!(
            "{:.0}% of the book is first-time visitors; rebooking converts them.",
            one_time_share
        ));
        recommendations.push("Offer next-visit booking at checkout.".into());
    }

    AgentContext {
        agent_type: AgentType::ClientAcquisition,
        focus: "New-client flow and second-visit conversion".into(),
        key_metrics,
        opportunities,
        threats,
        bottlenecks: Vec::new(),
        recommendations,
    }
}

fn brand(base: &BaseData, insights: &Insights) -> AgentContext {
    let mut key_metrics = BTreeMap::new();
    let vips = base
        .by_client
        .iter()
        .filter(|c| c.category == CustomerCategory::Vip)
        .count();
    key_metrics.insert("vip_clients".into(), vips as f64);

    let mut opportunities = Vec::new();
    let mut threats = Vec::new();
    let mut recommendations = Vec::new();

    if let Some(top) = base.by_service.first() {
        key_metrics.insert("top_service_share_pct".into(), top.share_pct);
        opportunities.push(format!(
            "{} is the signature offer; lead marketing with it.",
            top.name
        ));
        if top.share_pct > CONCENTRATION_PCT {
            threats.push(format!(
                "{:.0}% of revenue rides on one service.",
                top.share_pct
            ));
            recommendations.push("Feature a second service in the next campaign cycle.".into());
        }
    }

    if vips > 0 {
        opportunities.push(format!("{vips} VIP regulars can anchor a referral program."));
        recommendations.push("Give VIPs a shareable referral perk.".into());
    }

    if let Some(trend) = revenue_trend(insights) {
        if trend.trend == TrendLabel::Growing {
            opportunities.push("Momentum is positive; collect reviews while sentiment is high.".into());
        }
    }

    AgentContext {
        agent_type: AgentType::Brand,
        focus: "Reputation, signature services, and loyal regulars".into(),
        key_metrics,
        opportunities,
        threats,
        bottlenecks: Vec::new(),
        recommendations,
    }
}

fn growth(base: &BaseData, insights: &Insights) -> AgentContext {
    let summary = &base.summary;
    let mut key_metrics = BTreeMap::new();
    key_metrics.insert("unique_clients".into(), summary.unique_clients as f64);

    let mut opportunities = Vec::new();
    let mut threats = Vec::new();
    let mut recommendations = Vec::new();

    let growing = revenue_trend(insights)
        .map(|trend| {
            key_metrics.insert("revenue_growth_rate".into(), trend.growth_rate);
            if trend.trend == TrendLabel::Declining {
                threats.push("Shrinking revenue; fix retention before spending on reach.".into());
            }
            trend.trend == TrendLabel::Growing
        })
        .unwrap_or(false);

    if let Some(cap) = capacity(insights) {
        key_metrics.insert("utilization_pct".into(), cap.utilization_pct);
        match cap.level {
            CapacityLevel::Overbooked if growing => {
                opportunities.push("Demand outruns chairs; an added chair or hire pays for itself.".into());
                recommendations.push("Model a new hire against the overflow hours.".into());
            }
            CapacityLevel::Underutilized => {
                opportunities.push(format!(
                    "{:.0}% utilization means growth is a marketing problem, not a capacity one.",
                    cap.utilization_pct
                ));
                recommendations.push("Fill existing chairs before expanding.".into());
            }
            _ => {}
        }
    }

    AgentContext {
        agent_type: AgentType::Growth,
        focus: "Expansion readiness and demand headroom".into(),
        key_metrics,
        opportunities,
        threats,
        bottlenecks: Vec::new(),
        recommendations,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::base_data::Summary;
    use crate::models::Timeframe;

    fn base_with_summary(summary: Summary) -> BaseData {
        BaseData {
            timeframe: Timeframe::ThirtyDays,
            window_start: "2026-07-01T00:00:00+00:00".into(),
            summary,
            by_service: Vec::new(),
            by_client: Vec::new(),
            by_staff: Vec::new(),
        }
    }

    #[test]
    fn high_cancellation_is_a_financial_threat() {
        let base = base_with_summary(Summary {
            total_appointments: 20,
            unique_clients: 12,
            total_revenue: 900.0,
            avg_ticket: 45.0,
            cancellation_rate: 20.0,
            no_show_rate: 0.0,
        });
        let ctx = generate(AgentType::Financial, &base, &BTreeMap::new(), true);
        assert!(ctx.threats.iter().any(|t| t.contains("Cancellation")));
        assert!(ctx
            .recommendations
            .iter()
            .any(|r| r.contains("raise base prices 10-15%")));
    }

    #[test]
    fn recommendations_can_be_suppressed() {
        let base = base_with_summary(Summary {
            total_appointments: 20,
            unique_clients: 12,
            total_revenue: 900.0,
            avg_ticket: 45.0,
            cancellation_rate: 20.0,
            no_show_rate: 12.0,
        });
        let ctx = generate(AgentType::Operations, &base, &BTreeMap::new(), false);
        assert!(ctx.recommendations.is_empty());
        assert!(!ctx.threats.is_empty());
    }

    #[test]
    fn every_agent_type_produces_a_context() {
        let base = base_with_summary(Summary::default());
        for agent in [
            AgentType::Financial,
            AgentType::Operations,
            AgentType::ClientAcquisition,
            AgentType::Brand,
            AgentType::Growth,
        ] {
            let ctx = generate(agent, &base, &BTreeMap::new(), true);
            assert_eq!(ctx.agent_type, agent);
            assert!(!ctx.focus.is_empty());
        }
    }
}
