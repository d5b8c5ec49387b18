use crate::calc::{
    round_2, simple_mean, weights_from_percent, GradeEntry, GradingPolicy, SimulationRequest,
    SimulationResult, ValidationError,
};
use crate::ipc::error::{err, ok};
use crate::ipc::handlers::setup::load_grading;
use crate::ipc::helpers::{number_like, require_session};
use crate::ipc::types::{AppState, Request};
use serde_json::{json, Value};

const DEFAULT_LABEL: &str = "Sin tipo";

#[derive(Debug, Clone, Copy, PartialEq)]
enum WeightUnit {
    Fraction,
    Percent,
}

fn parse_weight_unit(params: &Value) -> Result<WeightUnit, String> {
    match params.get("unidad_peso") {
        None | Some(Value::Null) => Ok(WeightUnit::Fraction),
        Some(v) => match v.as_str().map(|s| s.trim().to_ascii_lowercase()).as_deref() {
            Some("fraccion") => Ok(WeightUnit::Fraction),
            Some("porcentaje") => Ok(WeightUnit::Percent),
            _ => Err("unidad_peso must be one of: fraccion, porcentaje".to_string()),
        },
    }
}

fn parse_optional_number(params: &Value, key: &str, default: f64) -> Result<f64, String> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(default),
        Some(v) => number_like(v).ok_or_else(|| format!("{} must be a number", key)),
    }
}

fn parse_entry(index: usize, raw: &Value) -> Result<GradeEntry, String> {
    let Some(obj) = raw.as_object() else {
        return Err(format!(
            "notas[{index}] must be an object with tipo, nota and peso"
        ));
    };
    let label = match obj.get("tipo") {
        None | Some(Value::Null) => DEFAULT_LABEL.to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(_) => return Err(format!("notas[{index}].tipo must be a string")),
    };
    let score = match obj.get("nota") {
        None | Some(Value::Null) => 0.0,
        Some(v) => number_like(v).ok_or_else(|| format!("notas[{index}].nota must be a number"))?,
    };
    let weight = match obj.get("peso") {
        None | Some(Value::Null) => 1.0,
        Some(v) => number_like(v).ok_or_else(|| format!("notas[{index}].peso must be a number"))?,
    };
    Ok(GradeEntry::new(label, score, weight))
}

fn parse_simulation(params: &Value, policy: &GradingPolicy) -> Result<SimulationRequest, String> {
    let Some(raw_entries) = params.get("notas").and_then(|v| v.as_array()) else {
        return Err("notas must be a list of grade entries".to_string());
    };
    let entries = raw_entries
        .iter()
        .enumerate()
        .map(|(i, v)| parse_entry(i, v))
        .collect::<Result<Vec<_>, _>>()?;
    let entries = match parse_weight_unit(params)? {
        WeightUnit::Fraction => entries,
        WeightUnit::Percent => weights_from_percent(entries),
    };
    Ok(SimulationRequest {
        entries,
        scale: parse_optional_number(params, "sistema", policy.scale)?,
        passing_threshold: parse_optional_number(
            params,
            "nota_minima_aprobacion",
            policy.passing_threshold,
        )?,
    })
}

fn validation_details(e: &ValidationError) -> Option<Value> {
    match e {
        ValidationError::WeightSum { sum } => Some(json!({
            "weightSum": round_2(*sum),
            "hint": "adjust the weights so they sum to exactly 1.0"
        })),
        ValidationError::ScoreOutOfRange { label, score, scale } => Some(json!({
            "tipo": label,
            "nota": score,
            "sistema": scale
        })),
        _ => None,
    }
}

fn result_to_json(sim: &SimulationRequest, r: &SimulationResult) -> Value {
    let entries: Vec<Value> = r
        .entries
        .iter()
        .map(|e| {
            json!({
                "tipo": e.label,
                "nota": e.score,
                "peso": e.weight,
                "contribucion": round_2(e.contribution),
                "porcentaje_contribucion": round_2(e.contribution_percent),
            })
        })
        .collect();
    json!({
        "promedio_simple": round_2(r.simple_average),
        "promedio_ponderado": round_2(r.weighted_average),
        "nota_final": round_2(r.final_score),
        "aprobado": r.passed,
        "categoria": r.category,
        "sistema_evaluacion": sim.scale,
        "nota_minima_aprobacion": sim.passing_threshold,
        "detalles": {
            "cantidad_evaluaciones": r.details.evaluation_count,
            "nota_maxima": r.details.highest_score,
            "nota_minima": r.details.lowest_score,
            "desviacion_estandar": round_2(r.details.std_deviation),
            "suma_pesos": round_2(r.details.weight_sum),
        },
        "notas_detalladas": entries,
    })
}

fn handle_simulate(state: &mut AppState, req: &Request) -> Value {
    let (conn, _) = match require_session(state, req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let policy = match load_grading(conn) {
        Ok(p) => p,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let sim = match parse_simulation(&req.params, &policy) {
        Ok(v) => v,
        Err(msg) => return err(&req.id, "bad_params", msg, None),
    };
    match sim.run(&policy.bands) {
        Ok(r) => ok(&req.id, json!({ "resultado": result_to_json(&sim, &r) })),
        Err(e) => err(&req.id, "validation_failed", e.to_string(), validation_details(&e)),
    }
}

fn handle_simulate_simple(state: &mut AppState, req: &Request) -> Value {
    let policy = match state.db.as_ref().map(load_grading).transpose() {
        Ok(p) => p.unwrap_or_default(),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(raw) = req.params.get("notas").and_then(|v| v.as_array()) else {
        return err(&req.id, "bad_params", "notas must be a list of numbers", None);
    };
    let scores = match raw
        .iter()
        .enumerate()
        .map(|(i, v)| number_like(v).ok_or_else(|| format!("notas[{i}] must be a number")))
        .collect::<Result<Vec<f64>, String>>()
    {
        Ok(v) => v,
        Err(msg) => return err(&req.id, "bad_params", msg, None),
    };
    match simple_mean(&scores, policy.passing_threshold) {
        Ok(m) => ok(
            &req.id,
            json!({
                "promedio": round_2(m.mean),
                "aprobado": m.passed,
                "cantidad_notas": m.count,
            }),
        ),
        Err(e) => err(&req.id, "validation_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "calc.simulate" => Some(handle_simulate(state, req)),
        "calc.simulateSimple" => Some(handle_simulate_simple(state, req)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_defaults_follow_policy() {
        let policy = GradingPolicy::default();
        let sim = parse_simulation(
            &json!({ "notas": [{ "nota": "15", "peso": 1 }] }),
            &policy,
        )
        .expect("parse");
        assert_eq!(sim.scale, 20.0);
        assert_eq!(sim.passing_threshold, 10.5);
        assert_eq!(sim.entries[0].label, "Sin tipo");
        assert_eq!(sim.entries[0].score, 15.0);
    }

    #[test]
    fn sistema_accepts_numeric_string_and_percent_weights() {
        let policy = GradingPolicy::default();
        let sim = parse_simulation(
            &json!({
                "notas": [{ "tipo": "A", "nota": 80, "peso": 50 }, { "tipo": "B", "nota": 60, "peso": 50 }],
                "sistema": "100",
                "nota_minima_aprobacion": 51,
                "unidad_peso": "porcentaje"
            }),
            &policy,
        )
        .expect("parse");
        assert_eq!(sim.scale, 100.0);
        assert_eq!(sim.entries[1].weight, 0.5);
        let r = sim.run(&policy.bands).expect("run");
        assert_eq!(r.final_score, 70.0);
        assert_eq!(r.category, "Bueno");
    }

    #[test]
    fn malformed_entries_are_bad_params() {
        let policy = GradingPolicy::default();
        assert!(parse_simulation(&json!({}), &policy).is_err());
        assert!(parse_simulation(&json!({ "notas": [12] }), &policy).is_err());
        assert!(parse_simulation(&json!({ "notas": [{ "nota": "x" }] }), &policy).is_err());
        assert!(parse_simulation(
            &json!({ "notas": [], "unidad_peso": "puntos" }),
            &policy
        )
        .is_err());
        // An empty list parses; the simulator rejects it.
        let sim = parse_simulation(&json!({ "notas": [] }), &policy).expect("parse");
        assert_eq!(sim.run(&policy.bands), Err(ValidationError::NoEntries));
    }
}
