//! Per-station atmosphere systems. Altitude is in km, speed in 1e2 m/s.

use mission_graph::{Partials, PortSpec, System, SystemError, Vars};
use nalgebra::DVector;

use crate::{density, speed_of_sound, temperature};

/// Static temperature along the profile.
#[derive(Debug, Clone)]
pub struct Temperature {
    n: usize,
}

impl Temperature {
    pub fn new(num_stations: usize) -> Self {
        Self { n: num_stations }
    }
}

impl System for Temperature {
    fn name(&self) -> &str {
        "temp"
    }

    fn inputs(&self) -> Vec<PortSpec> {
        vec![PortSpec::new("h", self.n)]
    }

    fn outputs(&self) -> Vec<PortSpec> {
        vec![PortSpec::filled("temp", self.n, 288.15)]
    }

    fn compute(&self, inputs: &Vars, outputs: &mut Vars) -> Result<(), SystemError> {
        let h = inputs.get("h")?;
        let mut temp = DVector::zeros(self.n);
        for (t, &h) in temp.iter_mut().zip(h.iter()) {
            *t = temperature(h)?.0;
        }
        outputs.set("temp", temp);
        Ok(())
    }

    fn compute_derivatives(&self, inputs: &Vars, _outputs: &Vars) -> Result<Partials, SystemError> {
        let h = inputs.get("h")?;
        let mut d_h = DVector::zeros(self.n);
        for (d, &h) in d_h.iter_mut().zip(h.iter()) {
            *d = temperature(h)?.1;
        }
        let mut partials = Partials::new();
        partials.insert_diagonal("temp", "h", &d_h);
        Ok(partials)
    }
}

/// Air density along the profile.
#[derive(Debug, Clone)]
pub struct Density {
    n: usize,
}

impl Density {
    pub fn new(num_stations: usize) -> Self {
        Self { n: num_stations }
    }
}

impl System for Density {
    fn name(&self) -> &str {
        "rho"
    }

    fn inputs(&self) -> Vec<PortSpec> {
        vec![
            PortSpec::new("h", self.n),
            PortSpec::filled("temp", self.n, 288.15),
        ]
    }

    fn outputs(&self) -> Vec<PortSpec> {
        vec![PortSpec::filled("rho", self.n, 1.225)]
    }

    fn compute(&self, inputs: &Vars, outputs: &mut Vars) -> Result<(), SystemError> {
        let h = inputs.get("h")?;
        let temp = inputs.get("temp")?;
        let mut rho = DVector::zeros(self.n);
        for i in 0..self.n {
            rho[i] = density(h[i], temp[i])?.0;
        }
        outputs.set("rho", rho);
        Ok(())
    }

    fn compute_derivatives(&self, inputs: &Vars, _outputs: &Vars) -> Result<Partials, SystemError> {
        let h = inputs.get("h")?;
        let temp = inputs.get("temp")?;
        let mut d_h = DVector::zeros(self.n);
        let mut d_temp = DVector::zeros(self.n);
        for i in 0..self.n {
            let (_, dh, dt) = density(h[i], temp[i])?;
            d_h[i] = dh;
            d_temp[i] = dt;
        }
        let mut partials = Partials::new();
        partials.insert_diagonal("rho", "h", &d_h);
        partials.insert_diagonal("rho", "temp", &d_temp);
        Ok(partials)
    }
}

/// True airspeed, either from Mach and temperature or taken from the velocity spline.
#[derive(Debug, Clone)]
pub struct Speed {
    n: usize,
    velocity_specified: bool,
}

impl Speed {
    pub fn new(num_stations: usize, velocity_specified: bool) -> Self {
        Self {
            n: num_stations,
            velocity_specified,
        }
    }
}

impl System for Speed {
    fn name(&self) -> &str {
        "speed"
    }

    fn inputs(&self) -> Vec<PortSpec> {
        vec![
            PortSpec::new("M", self.n),
            PortSpec::new("v_spline", self.n),
            PortSpec::filled("temp", self.n, 288.15),
        ]
    }

    fn outputs(&self) -> Vec<PortSpec> {
        vec![PortSpec::filled("v", self.n, 1.0)]
    }

    fn compute(&self, inputs: &Vars, outputs: &mut Vars) -> Result<(), SystemError> {
        if self.velocity_specified {
            outputs.set("v", inputs.get("v_spline")?.clone());
            return Ok(());
        }
        let mach = inputs.get("M")?;
        let temp = inputs.get("temp")?;
        let mut v = DVector::zeros(self.n);
        for i in 0..self.n {
            v[i] = mach[i] * speed_of_sound(temp[i])? / 100.0;
        }
        outputs.set("v", v);
        Ok(())
    }

    fn compute_derivatives(&self, inputs: &Vars, _outputs: &Vars) -> Result<Partials, SystemError> {
        let mut partials = Partials::new();
        if self.velocity_specified {
            partials.insert_diagonal("v", "v_spline", &DVector::from_element(self.n, 1.0));
            return Ok(partials);
        }
        let mach = inputs.get("M")?;
        let temp = inputs.get("temp")?;
        let mut d_mach = DVector::zeros(self.n);
        let mut d_temp = DVector::zeros(self.n);
        for i in 0..self.n {
            let a = speed_of_sound(temp[i])?;
            d_mach[i] = a / 100.0;
            d_temp[i] = mach[i] * a / (2.0 * temp[i]) / 100.0;
        }
        partials.insert_diagonal("v", "M", &d_mach);
        partials.insert_diagonal("v", "temp", &d_temp);
        Ok(partials)
    }
}
