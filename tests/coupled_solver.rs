use approx::assert_relative_eq;
use mission_analysis::graph::{
    CoupledGroup, DerivativeMode, Graph, IndependentVars, NewtonSettings, Partials, PortSpec,
    StateSpec, System, SystemError, Vars, Workflow, total_derivatives,
};
use nalgebra::DVector;

/// Implicit: r = y³ + y − u.
struct Cubic;

impl System for Cubic {
    fn name(&self) -> &str {
        "cubic"
    }
    fn inputs(&self) -> Vec<PortSpec> {
        vec![PortSpec::new("u", 1)]
    }
    fn outputs(&self) -> Vec<PortSpec> {
        vec![PortSpec::scalar("y", 0.5), PortSpec::new("r", 1)]
    }
    fn states(&self) -> Vec<StateSpec> {
        vec![StateSpec::new("y", "r")]
    }
    fn compute(&self, inputs: &Vars, outputs: &mut Vars) -> Result<(), SystemError> {
        let y = outputs.scalar("y")?;
        outputs.set_scalar("r", y.powi(3) + y - inputs.scalar("u")?);
        Ok(())
    }
    fn compute_derivatives(&self, _: &Vars, outputs: &Vars) -> Result<Partials, SystemError> {
        let y = outputs.scalar("y")?;
        let mut partials = Partials::new();
        partials.insert_diagonal("r", "y", &DVector::from_element(1, 3.0 * y * y + 1.0));
        partials.insert_diagonal("r", "u", &DVector::from_element(1, -1.0));
        Ok(partials)
    }
}

/// Explicit feedback: u = c − y / 2.
struct Relax;

impl System for Relax {
    fn name(&self) -> &str {
        "relax"
    }
    fn inputs(&self) -> Vec<PortSpec> {
        vec![PortSpec::new("y", 1), PortSpec::new("c", 1)]
    }
    fn outputs(&self) -> Vec<PortSpec> {
        vec![PortSpec::new("u", 1)]
    }
    fn compute(&self, inputs: &Vars, outputs: &mut Vars) -> Result<(), SystemError> {
        outputs.set_scalar("u", inputs.scalar("c")? - 0.5 * inputs.scalar("y")?);
        Ok(())
    }
    fn compute_derivatives(&self, _: &Vars, _: &Vars) -> Result<Partials, SystemError> {
        let mut partials = Partials::new();
        partials.insert_diagonal("u", "y", &DVector::from_element(1, -0.5));
        partials.insert_diagonal("u", "c", &DVector::from_element(1, 1.0));
        Ok(partials)
    }
}

/// z = y².
struct Square;

impl System for Square {
    fn name(&self) -> &str {
        "square"
    }
    fn inputs(&self) -> Vec<PortSpec> {
        vec![PortSpec::new("y", 1)]
    }
    fn outputs(&self) -> Vec<PortSpec> {
        vec![PortSpec::new("z", 1)]
    }
    fn compute(&self, inputs: &Vars, outputs: &mut Vars) -> Result<(), SystemError> {
        outputs.set_scalar("z", inputs.scalar("y")?.powi(2));
        Ok(())
    }
    fn compute_derivatives(&self, inputs: &Vars, _: &Vars) -> Result<Partials, SystemError> {
        let mut partials = Partials::new();
        partials.insert_diagonal("z", "y", &DVector::from_element(1, 2.0 * inputs.scalar("y")?));
        Ok(partials)
    }
}

fn build(c: f64, settings: NewtonSettings) -> (Graph, Workflow) {
    let mut graph = Graph::new();
    let params = graph
        .add(IndependentVars::new("params").with_scalar("c", c))
        .unwrap();
    let cubic = graph.add(Cubic).unwrap();
    let relax = graph.add(Relax).unwrap();
    let square = graph.add(Square).unwrap();
    graph.connect("params.c", "relax.c").unwrap();
    graph.connect("cubic.y", "relax.y").unwrap();
    graph.connect("relax.u", "cubic.u").unwrap();
    graph.connect("cubic.y", "square.y").unwrap();
    assert!(graph.list_unconnected_inputs().is_empty());

    let group = CoupledGroup::new("loop", &mut graph, vec![cubic, relax], settings).unwrap();
    let mut workflow = Workflow::new();
    workflow.push_system(params);
    workflow.push_group(group);
    workflow.push_system(square);
    (graph, workflow)
}

#[test]
fn newton_drives_state_and_tear_residuals_below_tolerance() {
    let settings = NewtonSettings::default();
    let (mut graph, workflow) = build(3.0, settings);
    let report = workflow.run(&mut graph).unwrap();
    assert!(report.converged());
    let newton = &report.newton[0];
    assert!(newton.residual_norm <= settings.atol + settings.rtol * newton.initial_norm);
    assert!(newton.iterations <= settings.max_iteration);

    let y = graph.scalar("cubic.y").unwrap();
    assert_relative_eq!(y.powi(3) + 1.5 * y, 3.0, epsilon = 1e-8);
    assert_relative_eq!(graph.scalar("relax.u").unwrap(), 3.0 - 0.5 * y, epsilon = 1e-8);
    assert_relative_eq!(graph.scalar("square.z").unwrap(), y * y, epsilon = 1e-12);
}

#[test]
fn damped_newton_still_converges() {
    let settings = NewtonSettings {
        damping: 0.5,
        max_iteration: 80,
        ..NewtonSettings::default()
    };
    let (mut graph, workflow) = build(3.0, settings);
    let report = workflow.run(&mut graph).unwrap();
    assert!(report.converged());
    assert!(report.newton[0].iterations > 1);
}

#[test]
fn iteration_cap_reports_a_warning_and_keeps_the_best_state() {
    let settings = NewtonSettings {
        max_iteration: 1,
        ..NewtonSettings::default()
    };
    let (mut graph, workflow) = build(3.0, settings);
    let report = workflow.run(&mut graph).unwrap();
    assert!(!report.converged());
    let warnings = report.warnings();
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].group, "loop");
    assert!(report.newton[0].residual_norm < report.newton[0].initial_norm);
    assert!(graph.scalar("square.z").unwrap().is_finite());
}

#[test]
fn rerunning_from_a_converged_state_is_idempotent() {
    let (mut graph, workflow) = build(3.0, NewtonSettings::default());
    workflow.run(&mut graph).unwrap();
    let first = graph.scalar("square.z").unwrap();
    workflow.run(&mut graph).unwrap();
    assert_relative_eq!(graph.scalar("square.z").unwrap(), first, epsilon = 1e-9);
}

#[test]
fn forward_and_adjoint_match_the_implicit_function_derivative() {
    let (mut graph, workflow) = build(3.0, NewtonSettings::default());
    workflow.run(&mut graph).unwrap();
    let y = graph.scalar("cubic.y").unwrap();
    let dy_dc = 1.0 / (3.0 * y * y + 1.5);
    let exact_z = 2.0 * y * dy_dc;

    let of = ["square.z", "cubic.y"];
    let forward =
        total_derivatives(&graph, &workflow, &of, &["params.c"], DerivativeMode::Forward).unwrap();
    let adjoint =
        total_derivatives(&graph, &workflow, &of, &["params.c"], DerivativeMode::Adjoint).unwrap();

    assert_eq!(forward.shape(), (2, 1));
    assert_relative_eq!(forward[(0, 0)], exact_z, max_relative = 1e-8);
    assert_relative_eq!(forward[(1, 0)], dy_dc, max_relative = 1e-8);
    assert_relative_eq!(forward, adjoint, max_relative = 1e-8);
}

#[test]
fn empty_groups_are_rejected() {
    let mut graph = Graph::new();
    graph.add(Cubic).unwrap();
    assert!(CoupledGroup::new("none", &mut graph, Vec::new(), NewtonSettings::default()).is_err());
}
