//! Projection of buffered row groups into domain profile shapes.
//!
//! Scalar fields come from the first row that carries them; repeated
//! sub-entries (attribute rules, metrics, routes, hosts, rates) contribute
//! one entry per row where their key column is present.

use super::data::LoaderData;
use super::LoaderError;
use crate::dm::{
    AttributeProfile, AttributeRule, ChargerProfile, DispatcherHost, DispatcherHostRef,
    DispatcherProfile, FilterProfile, FilterRuleDef, MetricDef, RateDef, RateProfile, RouteDef,
    RouteProfile, ResourceProfile, StatQueueProfile, ThresholdProfile,
};

fn field(rows: &[LoaderData], name: &str) -> String {
    rows.iter()
        .filter_map(|row| row.get(name))
        .find(|value| !value.is_empty())
        .cloned()
        .unwrap_or_default()
}

fn list(rows: &[LoaderData], name: &str) -> Vec<String> {
    split_list(&field(rows, name))
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(';')
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

fn number(rows: &[LoaderData], name: &str) -> Result<f64, LoaderError> {
    parse_number(&field(rows, name), name)
}

fn parse_number(value: &str, name: &str) -> Result<f64, LoaderError> {
    if value.is_empty() {
        return Ok(0.0);
    }
    value.parse().map_err(|_| LoaderError::BadField {
        field: name.to_string(),
        value: value.to_string(),
    })
}

fn integer(rows: &[LoaderData], name: &str) -> Result<i64, LoaderError> {
    let value = field(rows, name);
    if value.is_empty() {
        return Ok(0);
    }
    value.parse().map_err(|_| LoaderError::BadField {
        field: name.to_string(),
        value,
    })
}

fn flag(rows: &[LoaderData], name: &str) -> bool {
    parse_flag(&field(rows, name))
}

fn parse_flag(value: &str) -> bool {
    matches!(value, "true" | "True" | "1")
}

fn optional(rows: &[LoaderData], name: &str) -> Option<String> {
    let value = field(rows, name);
    (!value.is_empty()).then_some(value)
}

fn row_number(row: &LoaderData, name: &str) -> Result<f64, LoaderError> {
    parse_number(row.get(name).map(String::as_str).unwrap_or(""), name)
}

pub fn attribute_profile(rows: &[LoaderData]) -> Result<AttributeProfile, LoaderError> {
    let mut profile = AttributeProfile {
        tenant: field(rows, "Tenant"),
        id: field(rows, "ID"),
        contexts: list(rows, "Contexts"),
        filter_ids: list(rows, "FilterIDs"),
        blocker: flag(rows, "Blocker"),
        weight: number(rows, "Weight")?,
        attributes: Vec::new(),
    };
    for row in rows {
        let path = row.get("Path").cloned().unwrap_or_default();
        if path.is_empty() {
            continue;
        }
        profile.attributes.push(AttributeRule {
            filter_ids: split_list(row.get("AttributeFilterIDs").map(String::as_str).unwrap_or("")),
            path,
            rule_type: row.get("Type").cloned().unwrap_or_default(),
            value: row.get("Value").cloned().unwrap_or_default(),
        });
    }
    Ok(profile)
}

pub fn resource_profile(rows: &[LoaderData]) -> Result<ResourceProfile, LoaderError> {
    Ok(ResourceProfile {
        tenant: field(rows, "Tenant"),
        id: field(rows, "ID"),
        filter_ids: list(rows, "FilterIDs"),
        usage_ttl: optional(rows, "UsageTTL"),
        limit: number(rows, "Limit")?,
        allocation_message: field(rows, "AllocationMessage"),
        blocker: flag(rows, "Blocker"),
        stored: flag(rows, "Stored"),
        weight: number(rows, "Weight")?,
        threshold_ids: list(rows, "ThresholdIDs"),
    })
}

pub fn filter_profile(rows: &[LoaderData]) -> Result<FilterProfile, LoaderError> {
    let mut profile = FilterProfile {
        tenant: field(rows, "Tenant"),
        id: field(rows, "ID"),
        rules: Vec::new(),
    };
    for row in rows {
        let rule_type = row.get("Type").cloned().unwrap_or_default();
        if rule_type.is_empty() {
            continue;
        }
        profile.rules.push(FilterRuleDef {
            rule_type,
            element: row.get("Element").cloned().unwrap_or_default(),
            values: split_list(row.get("Values").map(String::as_str).unwrap_or("")),
        });
    }
    Ok(profile)
}

pub fn stat_queue_profile(rows: &[LoaderData]) -> Result<StatQueueProfile, LoaderError> {
    let mut profile = StatQueueProfile {
        tenant: field(rows, "Tenant"),
        id: field(rows, "ID"),
        filter_ids: list(rows, "FilterIDs"),
        queue_length: integer(rows, "QueueLength")?,
        ttl: optional(rows, "TTL"),
        min_items: integer(rows, "MinItems")? as usize,
        metrics: Vec::new(),
        stored: flag(rows, "Stored"),
        blocker: flag(rows, "Blocker"),
        weight: number(rows, "Weight")?,
        threshold_ids: list(rows, "ThresholdIDs"),
    };
    for row in rows {
        let metric_filters =
            split_list(row.get("MetricFilterIDs").map(String::as_str).unwrap_or(""));
        for metric_id in split_list(row.get("MetricIDs").map(String::as_str).unwrap_or("")) {
            profile.metrics.push(MetricDef {
                metric_id,
                filter_ids: metric_filters.clone(),
            });
        }
    }
    Ok(profile)
}

pub fn threshold_profile(rows: &[LoaderData]) -> Result<ThresholdProfile, LoaderError> {
    Ok(ThresholdProfile {
        tenant: field(rows, "Tenant"),
        id: field(rows, "ID"),
        filter_ids: list(rows, "FilterIDs"),
        max_hits: integer(rows, "MaxHits")?,
        min_hits: integer(rows, "MinHits")?,
        min_sleep: optional(rows, "MinSleep"),
        blocker: flag(rows, "Blocker"),
        weight: number(rows, "Weight")?,
        action_ids: list(rows, "ActionIDs"),
        run_async: flag(rows, "Async"),
    })
}

pub fn route_profile(rows: &[LoaderData]) -> Result<RouteProfile, LoaderError> {
    let mut profile = RouteProfile {
        tenant: field(rows, "Tenant"),
        id: field(rows, "ID"),
        filter_ids: list(rows, "FilterIDs"),
        sorting: field(rows, "Sorting"),
        sorting_parameters: list(rows, "SortingParameters"),
        routes: Vec::new(),
        weight: number(rows, "Weight")?,
    };
    for row in rows {
        let id = row.get("RouteID").cloned().unwrap_or_default();
        if id.is_empty() {
            continue;
        }
        profile.routes.push(RouteDef {
            id,
            filter_ids: split_list(row.get("RouteFilterIDs").map(String::as_str).unwrap_or("")),
            account_ids: split_list(row.get("RouteAccountIDs").map(String::as_str).unwrap_or("")),
            rating_plan_ids: split_list(
                row.get("RouteRatingPlanIDs").map(String::as_str).unwrap_or(""),
            ),
            resource_ids: split_list(
                row.get("RouteResourceIDs").map(String::as_str).unwrap_or(""),
            ),
            stat_ids: split_list(row.get("RouteStatIDs").map(String::as_str).unwrap_or("")),
            weight: row_number(row, "RouteWeight")?,
            blocker: parse_flag(row.get("RouteBlocker").map(String::as_str).unwrap_or("")),
            route_parameters: row.get("RouteParameters").cloned().unwrap_or_default(),
        });
    }
    Ok(profile)
}

pub fn charger_profile(rows: &[LoaderData]) -> Result<ChargerProfile, LoaderError> {
    Ok(ChargerProfile {
        tenant: field(rows, "Tenant"),
        id: field(rows, "ID"),
        filter_ids: list(rows, "FilterIDs"),
        run_id: field(rows, "RunID"),
        attribute_ids: list(rows, "AttributeIDs"),
        weight: number(rows, "Weight")?,
    })
}

pub fn dispatcher_profile(rows: &[LoaderData]) -> Result<DispatcherProfile, LoaderError> {
    let mut profile = DispatcherProfile {
        tenant: field(rows, "Tenant"),
        id: field(rows, "ID"),
        subsystems: list(rows, "Subsystems"),
        filter_ids: list(rows, "FilterIDs"),
        strategy: field(rows, "Strategy"),
        strategy_params: list(rows, "StrategyParameters"),
        hosts: Vec::new(),
        weight: number(rows, "Weight")?,
    };
    for row in rows {
        let id = row.get("ConnID").cloned().unwrap_or_default();
        if id.is_empty() {
            continue;
        }
        profile.hosts.push(DispatcherHostRef {
            id,
            filter_ids: split_list(row.get("ConnFilterIDs").map(String::as_str).unwrap_or("")),
            weight: row_number(row, "ConnWeight")?,
            blocker: parse_flag(row.get("ConnBlocker").map(String::as_str).unwrap_or("")),
            params: row.get("ConnParameters").cloned().unwrap_or_default(),
        });
    }
    Ok(profile)
}

pub fn dispatcher_host(rows: &[LoaderData]) -> Result<DispatcherHost, LoaderError> {
    Ok(DispatcherHost {
        tenant: field(rows, "Tenant"),
        id: field(rows, "ID"),
        address: field(rows, "Address"),
        transport: field(rows, "Transport"),
        tls: flag(rows, "TLS"),
    })
}

pub fn rate_profile(rows: &[LoaderData]) -> Result<RateProfile, LoaderError> {
    let mut profile = RateProfile {
        tenant: field(rows, "Tenant"),
        id: field(rows, "ID"),
        filter_ids: list(rows, "FilterIDs"),
        weight: number(rows, "Weight")?,
        rates: Vec::new(),
    };
    for row in rows {
        let id = row.get("RateID").cloned().unwrap_or_default();
        if id.is_empty() {
            continue;
        }
        profile.rates.push(RateDef {
            id,
            filter_ids: split_list(row.get("RateFilterIDs").map(String::as_str).unwrap_or("")),
            activation_times: row.get("RateActivationTimes").cloned().unwrap_or_default(),
            weight: row_number(row, "RateWeight")?,
            blocker: parse_flag(row.get("RateBlocker").map(String::as_str).unwrap_or("")),
            interval_start: row.get("RateIntervalStart").cloned().filter(|v| !v.is_empty()),
            fixed_fee: row_number(row, "RateFixedFee")?,
            recurrent_fee: row_number(row, "RateRecurrentFee")?,
            unit: row.get("RateUnit").cloned().filter(|v| !v.is_empty()),
            increment: row.get("RateIncrement").cloned().filter(|v| !v.is_empty()),
        });
    }
    Ok(profile)
}

/// Rate IDs named by a `*partial` removal row.
pub fn rate_ids(row: &LoaderData) -> Vec<String> {
    split_list(row.get("RateIDs").map(String::as_str).unwrap_or(""))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, &str)]) -> LoaderData {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn attribute_profile_collects_rules_per_row() {
        let rows = vec![
            row(&[
                ("Tenant", "example.org"),
                ("ID", "ATTR_1"),
                ("Contexts", "*sessions;*cdrs"),
                ("Weight", "10"),
                ("Path", "*req.Category"),
                ("Type", "*constant"),
                ("Value", "call"),
            ]),
            row(&[
                ("Tenant", "example.org"),
                ("ID", "ATTR_1"),
                ("Path", "*req.RequestType"),
                ("Type", "*constant"),
                ("Value", "*prepaid"),
            ]),
        ];
        let profile = attribute_profile(&rows).unwrap();
        assert_eq!(profile.tenant, "example.org");
        assert_eq!(profile.contexts, vec!["*sessions", "*cdrs"]);
        assert_eq!(profile.weight, 10.0);
        assert_eq!(profile.attributes.len(), 2);
        assert_eq!(profile.attributes[1].value, "*prepaid");
    }

    #[test]
    fn bad_numeric_field_is_reported() {
        let rows = vec![row(&[("Tenant", "t"), ("ID", "i"), ("Weight", "heavy")])];
        assert!(matches!(
            attribute_profile(&rows),
            Err(LoaderError::BadField { .. })
        ));
    }

    #[test]
    fn route_profile_rows_become_routes() {
        let rows = vec![
            row(&[
                ("Tenant", "example.org"),
                ("ID", "RP_1"),
                ("Sorting", "*weight"),
                ("RouteID", "route1"),
                ("RouteWeight", "20"),
            ]),
            row(&[("RouteID", "route2"), ("RouteWeight", "10")]),
        ];
        let profile = route_profile(&rows).unwrap();
        assert_eq!(profile.sorting, "*weight");
        assert_eq!(profile.routes.len(), 2);
        assert_eq!(profile.routes[0].weight, 20.0);
    }

    #[test]
    fn rate_ids_split() {
        let data = row(&[("RateIDs", "RT_WEEK;RT_WEEKEND")]);
        assert_eq!(rate_ids(&data), vec!["RT_WEEK", "RT_WEEKEND"]);
    }
}
