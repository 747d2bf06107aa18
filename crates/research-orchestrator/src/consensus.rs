use research_core::{AgentView, Consensus, Direction, Recommendation, RiskLevel};
use std::collections::BTreeMap;

/// Confidence-weighted vote across agent views.
///
/// Views are collapsed to buy/hold/sell. A direction wins only with strictly
/// more weight than each of the others, otherwise the vote settles on HOLD.
/// The strong variant is kept when every winning voter asked for it.
pub fn compute_consensus(agents: &BTreeMap<String, AgentView>) -> Option<Consensus> {
    let votes: Vec<(Recommendation, f64)> = agents
        .values()
        .filter_map(|v| v.recommendation.map(|r| (r, v.score)))
        .collect();
    if votes.is_empty() {
        return None;
    }

    let weight = |d: Direction| -> f64 {
        votes
            .iter()
            .filter(|(r, _)| r.direction() == d)
            .map(|(_, w)| w)
            .sum()
    };
    let (buy, hold, sell) = (weight(Direction::Buy), weight(Direction::Hold), weight(Direction::Sell));
    let total = buy + hold + sell;

    let direction = if buy > sell && buy > hold {
        Direction::Buy
    } else if sell > buy && sell > hold {
        Direction::Sell
    } else {
        Direction::Hold
    };

    let winners: Vec<Recommendation> = votes
        .iter()
        .map(|(r, _)| *r)
        .filter(|r| r.direction() == direction)
        .collect();
    let recommendation = match direction {
        Direction::Buy if winners.iter().all(|r| *r == Recommendation::StrongBuy) => {
            Recommendation::StrongBuy
        }
        Direction::Buy => Recommendation::Buy,
        Direction::Sell if winners.iter().all(|r| *r == Recommendation::StrongSell) => {
            Recommendation::StrongSell
        }
        Direction::Sell => Recommendation::Sell,
        Direction::Hold => Recommendation::Hold,
    };

    // A HOLD reached by deadlock carries no weight of its own
    let winning_weight = weight(direction);
    let confidence = if winning_weight > 0.0 && total > 0.0 {
        winning_weight / total
    } else {
        0.5
    };

    let targets: Vec<f64> = agents.values().filter_map(|v| v.target_price).collect();
    let average_target_price =
        (!targets.is_empty()).then(|| targets.iter().sum::<f64>() / targets.len() as f64);

    Some(Consensus {
        recommendation,
        confidence,
        agreement_level: winners.len() as f64 / votes.len() as f64,
        average_target_price,
        risk_adjustment: None,
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct RiskAdjusted {
    pub recommendation: Recommendation,
    pub confidence: f64,
    pub note: Option<String>,
}

/// Downgrade calls that the risk picture does not support.
///
/// High risk (level HIGH or score above 70) turns a buy into HOLD at 80% of
/// the confidence. A score above 80 also turns HOLD into SELL at 90%.
pub fn apply_risk_adjustment(
    recommendation: Recommendation,
    confidence: f64,
    risk_level: RiskLevel,
    risk_score: f64,
) -> RiskAdjusted {
    let high_risk = risk_level == RiskLevel::High || risk_score > 70.0;
    if high_risk && recommendation.direction() == Direction::Buy {
        return RiskAdjusted {
            recommendation: Recommendation::Hold,
            confidence: confidence * 0.8,
            note: Some(format!("Downgraded from {} to HOLD due to high risk", recommendation)),
        };
    }
    if high_risk && recommendation == Recommendation::Hold && risk_score > 80.0 {
        return RiskAdjusted {
            recommendation: Recommendation::Sell,
            confidence: confidence * 0.9,
            note: Some("Downgraded from HOLD to SELL due to very high risk".to_string()),
        };
    }
    RiskAdjusted {
        recommendation,
        confidence,
        note: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view(rec: Recommendation, score: f64, target: Option<f64>) -> AgentView {
        AgentView {
            score,
            reasoning: String::new(),
            recommendation: Some(rec),
            target_price: target,
        }
    }

    fn panel(views: Vec<(&str, AgentView)>) -> BTreeMap<String, AgentView> {
        views.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
    }

    #[test]
    fn test_weighted_vote() {
        let agents = panel(vec![
            ("optimistic", view(Recommendation::StrongBuy, 0.9, Some(220.0))),
            ("pessimistic", view(Recommendation::Sell, 0.4, Some(160.0))),
            ("risk_manager", view(Recommendation::Buy, 0.5, None)),
        ]);
        let c = compute_consensus(&agents).unwrap();
        assert_eq!(c.recommendation, Recommendation::Buy);
        assert!((c.confidence - 1.4 / 1.8).abs() < 1e-9);
        assert!((c.agreement_level - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(c.average_target_price, Some(190.0));
    }

    #[test]
    fn test_tie_settles_on_hold() {
        let agents = panel(vec![
            ("optimistic", view(Recommendation::Buy, 0.6, None)),
            ("pessimistic", view(Recommendation::Sell, 0.6, None)),
        ]);
        let c = compute_consensus(&agents).unwrap();
        assert_eq!(c.recommendation, Recommendation::Hold);
        assert_eq!(c.confidence, 0.5);
        assert_eq!(c.agreement_level, 0.0);
    }

    #[test]
    fn test_unanimous_strong_sell() {
        let agents = panel(vec![
            ("optimistic", view(Recommendation::StrongSell, 0.7, None)),
            ("pessimistic", view(Recommendation::StrongSell, 0.9, None)),
        ]);
        let c = compute_consensus(&agents).unwrap();
        assert_eq!(c.recommendation, Recommendation::StrongSell);
        assert_eq!(c.agreement_level, 1.0);
    }

    #[test]
    fn test_no_votes() {
        assert!(compute_consensus(&BTreeMap::new()).is_none());
    }

    #[test]
    fn test_risk_adjustment() {
        let adj = apply_risk_adjustment(Recommendation::Buy, 0.8, RiskLevel::High, 50.0);
        assert_eq!(adj.recommendation, Recommendation::Hold);
        assert!((adj.confidence - 0.64).abs() < 1e-9);

        let adj = apply_risk_adjustment(Recommendation::StrongBuy, 0.8, RiskLevel::Medium, 75.0);
        assert_eq!(adj.recommendation, Recommendation::Hold);

        let adj = apply_risk_adjustment(Recommendation::Hold, 0.6, RiskLevel::Medium, 85.0);
        assert_eq!(adj.recommendation, Recommendation::Sell);
        assert!((adj.confidence - 0.54).abs() < 1e-9);

        // High level alone is not enough to push HOLD to SELL
        let adj = apply_risk_adjustment(Recommendation::Hold, 0.6, RiskLevel::High, 60.0);
        assert_eq!(adj.recommendation, Recommendation::Hold);
        assert!(adj.note.is_none());

        let adj = apply_risk_adjustment(Recommendation::Sell, 0.6, RiskLevel::High, 95.0);
        assert_eq!(adj.recommendation, Recommendation::Sell);
    }
}
