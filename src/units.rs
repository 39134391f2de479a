//! One-line unit conversion for values read from or written to signals.
//!
//! Units are named by short symbol (`mm`, `keV`, `degC`) or by full name.
//! Conversion goes through `uom` quantities, so offset scales such as Celsius
//! are handled.

use uom::si::{
    angle, energy,
    f64::{Angle, Energy, Frequency, Length, ThermodynamicTemperature, Time},
    frequency, length, thermodynamic_temperature, time,
};

use crate::error::{DeviceError, DeviceResult};

macro_rules! unit_table {
    ($($quantity:ident / $module:ident { $($($symbol:literal)|+ => $unit:ident),+ $(,)? })+) => {
        #[derive(Debug, Clone, Copy)]
        enum Quantity {
            $($quantity($quantity)),+
        }

        fn quantity_of(value: f64, unit: &str) -> Option<Quantity> {
            $(
                match unit {
                    $($($symbol)|+ => return Some(Quantity::$quantity($quantity::new::<$module::$unit>(value))),)+
                    _ => {}
                }
            )+
            None
        }

        fn magnitude_in(quantity: Quantity, unit: &str) -> Option<f64> {
            match quantity {
                $(
                    Quantity::$quantity(q) => match unit {
                        $($($symbol)|+ => Some(q.get::<$module::$unit>()),)+
                        _ => None,
                    },
                )+
            }
        }
    };
}

unit_table! {
    Length / length {
        "m" | "meter" => meter,
        "cm" | "centimeter" => centimeter,
        "mm" | "millimeter" => millimeter,
        "um" | "micrometer" | "micron" => micrometer,
        "nm" | "nanometer" => nanometer,
        "km" | "kilometer" => kilometer,
        "in" | "inch" => inch,
    }
    Angle / angle {
        "rad" | "radian" => radian,
        "deg" | "degree" => degree,
        "rev" | "revolution" => revolution,
    }
    Time / time {
        "s" | "second" => second,
        "ms" | "millisecond" => millisecond,
        "us" | "microsecond" => microsecond,
        "ns" | "nanosecond" => nanosecond,
        "min" | "minute" => minute,
        "h" | "hour" => hour,
    }
    Energy / energy {
        "J" | "joule" => joule,
        "eV" | "electronvolt" => electronvolt,
        "keV" | "kiloelectronvolt" => kiloelectronvolt,
    }
    Frequency / frequency {
        "Hz" | "hertz" => hertz,
        "kHz" | "kilohertz" => kilohertz,
        "MHz" | "megahertz" => megahertz,
    }
    ThermodynamicTemperature / thermodynamic_temperature {
        "K" | "kelvin" => kelvin,
        "degC" | "celsius" => degree_celsius,
        "degF" | "fahrenheit" => degree_fahrenheit,
    }
}

/// Converts `value` from `unit` to `new_unit`.
pub fn convert_unit(value: f64, unit: &str, new_unit: &str) -> DeviceResult<f64> {
    let quantity =
        quantity_of(value, unit).ok_or_else(|| DeviceError::UnknownUnit(unit.to_string()))?;
    magnitude_in(quantity, new_unit).ok_or_else(|| {
        if quantity_of(0.0, new_unit).is_some() {
            DeviceError::IncompatibleUnits {
                from: unit.to_string(),
                to: new_unit.to_string(),
            }
        } else {
            DeviceError::UnknownUnit(new_unit.to_string())
        }
    })
}
