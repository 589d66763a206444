//! Polynomial pseudo-motor.
//!
//! The pseudo position `x` drives a dependent motor to `y = Σ cᵢ·xⁱ`. Reading
//! the position inverts the polynomial: exactly for degree 0 and 1, by Newton
//! iteration from the last position otherwise, falling back to bisection
//! when Newton does not settle.
//!
//! # Example
//!
//! ```toml
//! [[records]]
//! name = "energy"
//! driver = "polynomial_motor"
//! fields = { dependent = "mono_angle", num_coefficients = 3, coefficients = [0.5, 2.0, 0.01] }
//! ```

use tracing::debug;

use daq_records::classes::{MotorDriver, MotorState, MotorStatus};
use daq_records::{
    Database, DeviceError, DeviceResult, Dimension, DriverError, DriverErrorKind, DriverFactory,
    FieldDescriptor, FieldStore, FieldValue, RecordClass, RecordContext, RecordDriver,
    ScalarType,
};

use super::Child;

const DRIVER_TYPE: &str = "polynomial_motor";

const NEWTON_ITERATIONS: usize = 100;
const BISECTION_ITERATIONS: usize = 200;

/// Polynomial with coefficients in ascending order of power.
#[derive(Debug, Clone, PartialEq)]
pub struct Polynomial {
    coefficients: Vec<f64>,
}

impl Polynomial {
    /// Polynomial `Σ coefficients[i]·xⁱ`; trailing zero coefficients are
    /// dropped.
    pub fn new(mut coefficients: Vec<f64>) -> Self {
        while coefficients.last() == Some(&0.0) {
            coefficients.pop();
        }
        Self { coefficients }
    }

    /// Highest power with a non-zero coefficient; `None` for the zero
    /// polynomial.
    pub fn degree(&self) -> Option<usize> {
        self.coefficients.len().checked_sub(1)
    }

    /// Value at `x`.
    pub fn eval(&self, x: f64) -> f64 {
        self.coefficients.iter().rev().fold(0.0, |acc, &c| acc * x + c)
    }

    /// First derivative at `x`.
    pub fn slope(&self, x: f64) -> f64 {
        self.coefficients
            .iter()
            .enumerate()
            .skip(1)
            .rev()
            .fold(0.0, |acc, (power, &c)| acc * x + power as f64 * c)
    }

    /// An `x` with `eval(x) == y`, searched near `guess`.
    pub fn invert(&self, y: f64, guess: f64) -> Option<f64> {
        match self.coefficients.as_slice() {
            [] | [_] => None,
            [c0, c1] => Some((y - c0) / c1),
            _ => self.newton(y, guess).or_else(|| self.bisect(y, guess)),
        }
    }

    fn newton(&self, y: f64, guess: f64) -> Option<f64> {
        let mut x = guess;
        for _ in 0..NEWTON_ITERATIONS {
            let slope = self.slope(x);
            if slope == 0.0 || !slope.is_finite() {
                return None;
            }
            let step = (self.eval(x) - y) / slope;
            x -= step;
            if !x.is_finite() {
                return None;
            }
            if step.abs() <= 1e-12 * (1.0 + x.abs()) {
                return Some(x);
            }
        }
        None
    }

    fn bisect(&self, y: f64, guess: f64) -> Option<f64> {
        let f = |x: f64| self.eval(x) - y;
        let mut width = 1.0;
        let (mut low, mut high) = loop {
            let (low, high) = (guess - width, guess + width);
            if f(low).signum() != f(high).signum() || f(low) == 0.0 {
                break (low, high);
            }
            width *= 2.0;
            if !width.is_finite() || width > 1e300 {
                return None;
            }
        };
        for _ in 0..BISECTION_ITERATIONS {
            let mid = 0.5 * (low + high);
            if f(mid) == 0.0 || high - low <= f64::EPSILON * (1.0 + mid.abs()) {
                return Some(mid);
            }
            if f(low).signum() == f(mid).signum() {
                low = mid;
            } else {
                high = mid;
            }
        }
        Some(0.5 * (low + high))
    }
}

/// Pseudo-motor driving a dependent motor through a polynomial.
#[derive(Debug)]
pub struct PolynomialMotor {
    dependent: Child,
    polynomial: Polynomial,
}

impl PolynomialMotor {
    fn from_fields(fields: &FieldStore) -> Result<Self, DriverError> {
        let dependent = Child::from_field(fields, "dependent")
            .map_err(|e| DriverError::from_field(DRIVER_TYPE, e))?;
        let coefficients = fields
            .get_array::<f64>("coefficients")
            .map_err(|e| DriverError::from_field(DRIVER_TYPE, e))?;
        let polynomial = Polynomial::new(coefficients);
        if polynomial.degree().unwrap_or(0) < 1 {
            return Err(DriverError::new(
                DRIVER_TYPE,
                DriverErrorKind::Configuration,
                "coefficients must describe a non-constant polynomial",
            ));
        }
        Ok(Self {
            dependent,
            polynomial,
        })
    }

    fn dependent_position(&self, x: f64) -> DeviceResult<f64> {
        let y = self.polynomial.eval(x);
        if y.is_finite() {
            Ok(y)
        } else {
            Err(DeviceError::invalid_parameter(
                "position",
                format!("{x} maps outside the dependent motor's range"),
            ))
        }
    }
}

impl MotorDriver for PolynomialMotor {
    fn move_absolute(&mut self, _state: &mut MotorState, raw_destination: f64) -> DeviceResult<()> {
        let y = self.dependent_position(raw_destination)?;
        debug!(x = raw_destination, y, "polynomial move");
        self.dependent.with(|record| record.motor()?.move_absolute(y))
    }

    fn get_position(&mut self, state: &mut MotorState) -> DeviceResult<f64> {
        let y = self.dependent.with(|record| record.motor()?.get_position())?;
        self.polynomial
            .invert(y, state.raw_position)
            .ok_or_else(|| {
                DeviceError::invalid_parameter(
                    "coefficients",
                    format!("no position maps to dependent position {y}"),
                )
            })
    }

    fn set_position(&mut self, _state: &mut MotorState, raw_position: f64) -> DeviceResult<()> {
        let y = self.dependent_position(raw_position)?;
        self.dependent.with(|record| record.motor()?.set_position(y))
    }

    fn soft_abort(&mut self, _state: &mut MotorState) -> DeviceResult<()> {
        self.dependent.with(|record| record.motor()?.soft_abort())
    }

    fn immediate_abort(&mut self, _state: &mut MotorState) -> DeviceResult<()> {
        self.dependent.with(|record| record.motor()?.immediate_abort())
    }

    fn get_status(&mut self, _state: &mut MotorState) -> DeviceResult<MotorStatus> {
        self.dependent.with(|record| record.motor()?.get_status())
    }

    /// Moves the dependent motor in the direction that increases `x`.
    fn constant_velocity_move(&mut self, state: &mut MotorState, direction: i32) -> DeviceResult<()> {
        let direction = if self.polynomial.slope(state.raw_position) < 0.0 {
            -direction
        } else {
            direction
        };
        self.dependent
            .with(|record| record.motor()?.constant_velocity_move(direction))
    }
}

impl RecordDriver for PolynomialMotor {
    fn initialize(&mut self, _ctx: &mut RecordContext<'_>, database: &Database) -> DeviceResult<()> {
        self.dependent.bind(database)
    }

    fn as_motor(&mut self) -> Option<&mut dyn MotorDriver> {
        Some(self)
    }
}

/// Factory for `polynomial_motor` records.
pub struct PolynomialMotorFactory;

impl DriverFactory for PolynomialMotorFactory {
    fn driver_type(&self) -> &'static str {
        DRIVER_TYPE
    }

    fn class(&self) -> RecordClass {
        RecordClass::Motor
    }

    fn description(&self) -> &'static str {
        "Pseudo-motor mapped onto a dependent motor by a polynomial"
    }

    fn fields(&self) -> Vec<FieldDescriptor> {
        vec![
            FieldDescriptor::scalar("dependent", ScalarType::RecordRef)
                .read_only()
                .in_description(),
            FieldDescriptor::scalar("num_coefficients", ScalarType::Int32)
                .with_default(FieldValue::Int32(2))
                .read_only()
                .in_description(),
            FieldDescriptor::array(
                "coefficients",
                ScalarType::Double,
                Dimension::depends_on("num_coefficients"),
            )
            .read_only()
            .in_description(),
        ]
    }

    fn create(&self, fields: &FieldStore) -> Result<Box<dyn RecordDriver>, DriverError> {
        Ok(Box::new(PolynomialMotor::from_fields(fields)?))
    }
}
