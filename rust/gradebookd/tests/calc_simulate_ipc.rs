mod support;

use serde_json::json;
use support::Sidecar;

fn approx(v: &serde_json::Value, expected: f64) -> bool {
    v.as_f64().map(|x| (x - expected).abs() < 1e-9).unwrap_or(false)
}

#[test]
fn simulate_requires_a_session() {
    let workspace = support::temp_dir("gradebook-calc-auth");
    let mut sc = Sidecar::spawn();
    sc.open_workspace(&workspace);
    let (code, _) = sc.request_err(
        "calc.simulate",
        json!({ "notas": [{ "tipo": "Final", "nota": 15, "peso": 1.0 }] }),
    );
    assert_eq!(code, "unauthorized");
}

#[test]
fn simulate_reports_weighted_breakdown() {
    let (mut sc, _ws) = Sidecar::ready("gradebook-calc-breakdown");
    let result = sc.request_ok(
        "calc.simulate",
        json!({
            "notas": [
                { "tipo": "Parcial 1", "nota": 15.5, "peso": 0.20 },
                { "tipo": "Parcial 2", "nota": 17.0, "peso": 0.20 },
                { "tipo": "Prácticas", "nota": 18.0, "peso": 0.30 },
                { "tipo": "Final", "nota": 16.5, "peso": 0.30 }
            ],
            "sistema": "20",
            "nota_minima_aprobacion": 10.5
        }),
    );
    let r = &result["resultado"];
    assert!(approx(&r["promedio_simple"], 16.75), "{r}");
    assert!(approx(&r["promedio_ponderado"], 16.85), "{r}");
    assert!(approx(&r["nota_final"], 16.85), "{r}");
    assert_eq!(r["aprobado"], json!(true));
    assert_eq!(r["categoria"], json!("Muy Bueno"));
    assert!(approx(&r["sistema_evaluacion"], 20.0));
    assert_eq!(r["detalles"]["cantidad_evaluaciones"], json!(4));
    assert!(approx(&r["detalles"]["nota_maxima"], 18.0));
    assert!(approx(&r["detalles"]["nota_minima"], 15.5));
    assert!(approx(&r["detalles"]["suma_pesos"], 1.0));
    let detailed = r["notas_detalladas"].as_array().expect("notas_detalladas");
    assert_eq!(detailed.len(), 4);
    assert!(approx(&detailed[2]["contribucion"], 5.4));
}

#[test]
fn single_and_two_entry_properties() {
    let (mut sc, _ws) = Sidecar::ready("gradebook-calc-props");

    let one = sc.request_ok(
        "calc.simulate",
        json!({
            "notas": [{ "tipo": "Final", "nota": 15, "peso": 1.0 }],
            "sistema": 20,
            "nota_minima_aprobacion": 10.5
        }),
    );
    let r = &one["resultado"];
    assert!(approx(&r["promedio_simple"], 15.0));
    assert!(approx(&r["promedio_ponderado"], 15.0));
    assert!(approx(&r["nota_final"], 15.0));
    assert_eq!(r["aprobado"], json!(true));

    let two = sc.request_ok(
        "calc.simulate",
        json!({
            "notas": [
                { "tipo": "A", "nota": 10, "peso": 0.5 },
                { "tipo": "B", "nota": 20, "peso": 0.5 }
            ],
            "nota_minima_aprobacion": 10.5
        }),
    );
    let r = &two["resultado"];
    assert!(approx(&r["promedio_simple"], 15.0));
    assert!(approx(&r["promedio_ponderado"], 15.0));
    assert_eq!(r["aprobado"], json!(true));
}

#[test]
fn threshold_boundary_is_inclusive() {
    let (mut sc, _ws) = Sidecar::ready("gradebook-calc-boundary");
    let result = sc.request_ok(
        "calc.simulate",
        json!({
            "notas": [
                { "tipo": "A", "nota": 10, "peso": 0.5 },
                { "tipo": "B", "nota": 11, "peso": 0.5 }
            ],
            "nota_minima_aprobacion": 10.5
        }),
    );
    assert!(approx(&result["resultado"]["nota_final"], 10.5));
    assert_eq!(result["resultado"]["aprobado"], json!(true));
    assert_eq!(result["resultado"]["categoria"], json!("Aprobado"));
}

#[test]
fn weight_sums_outside_tolerance_fail_validation() {
    let (mut sc, _ws) = Sidecar::ready("gradebook-calc-weights");
    for (a, b, sum) in [(0.6, 0.6, 1.2), (0.25, 0.25, 0.5)] {
        let (code, error) = sc.request_err(
            "calc.simulate",
            json!({
                "notas": [
                    { "tipo": "A", "nota": 12, "peso": a },
                    { "tipo": "B", "nota": 14, "peso": b }
                ]
            }),
        );
        assert_eq!(code, "validation_failed");
        assert!(approx(&error["details"]["weightSum"], sum), "{error}");
    }
}

#[test]
fn empty_and_out_of_range_inputs_fail_validation() {
    let (mut sc, _ws) = Sidecar::ready("gradebook-calc-invalid");

    let (code, _) = sc.request_err("calc.simulate", json!({ "notas": [] }));
    assert_eq!(code, "validation_failed");

    let (code, error) = sc.request_err(
        "calc.simulate",
        json!({ "notas": [{ "tipo": "Final", "nota": 21, "peso": 1.0 }] }),
    );
    assert_eq!(code, "validation_failed");
    assert_eq!(error["details"]["tipo"], json!("Final"));

    let (code, _) = sc.request_err("calc.simulate", json!({}));
    assert_eq!(code, "bad_params");

    let (code, _) = sc.request_err(
        "calc.simulate",
        json!({ "notas": [{ "tipo": "Final", "nota": "quince", "peso": 1.0 }] }),
    );
    assert_eq!(code, "bad_params");
}

#[test]
fn percent_weights_are_accepted() {
    let (mut sc, _ws) = Sidecar::ready("gradebook-calc-percent");
    let result = sc.request_ok(
        "calc.simulate",
        json!({
            "notas": [
                { "tipo": "A", "nota": 10, "peso": 40 },
                { "tipo": "B", "nota": 20, "peso": 60 }
            ],
            "unidad_peso": "porcentaje"
        }),
    );
    assert!(approx(&result["resultado"]["promedio_ponderado"], 16.0));
    assert_eq!(result["resultado"]["categoria"], json!("Muy Bueno"));
}

#[test]
fn simulate_simple_needs_no_session_or_workspace() {
    let mut sc = Sidecar::spawn();
    let result = sc.request_ok("calc.simulateSimple", json!({ "notas": [15, 17, 18, 16] }));
    assert!(approx(&result["promedio"], 16.5));
    assert_eq!(result["aprobado"], json!(true));
    assert_eq!(result["cantidad_notas"], json!(4));

    let low = sc.request_ok("calc.simulateSimple", json!({ "notas": [8, 10] }));
    assert_eq!(low["aprobado"], json!(false));

    let (code, _) = sc.request_err("calc.simulateSimple", json!({ "notas": [] }));
    assert_eq!(code, "validation_failed");
}
