pub mod campaign_decision;
