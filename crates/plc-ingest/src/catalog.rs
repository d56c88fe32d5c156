// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Declarative catalog of telemetry sources.
//!
//! One physical plant feeds sixteen sources: eight polymerization reactors,
//! the tank farm, two scrubbers, the filter press, the auxiliary-facilities
//! block, and the natural-gas, electricity, and water meters. Each source
//! *kind* declares pure data — a store collection, a field rule table, an
//! inbound mapper, and a monotonic-counter predicate. The sanitization and
//! carry-forward algorithms are shared code parameterized by this table;
//! adding a source means adding rows here, not modules.

use crate::sanitize::{FieldRule, RuleTable};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// The plant's source types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    Reactor,
    TankFarm,
    Scrubber,
    FilterPress,
    AuxiliaryFacilities,
    GasMeter,
    ElectricMeter,
    WaterMeter,
}

/// Inbound field-group transformation applied before sanitization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mapper {
    /// Fields arrive in their final shape.
    PassThrough,
    /// Boolean contact states become 0/1 so numeric rules apply uniformly.
    BoolToNumeric,
}

impl Mapper {
    pub fn apply(&self, mut fields: Map<String, Value>) -> Map<String, Value> {
        match self {
            Mapper::PassThrough => fields,
            Mapper::BoolToNumeric => {
                for value in fields.values_mut() {
                    if let Value::Bool(b) = value {
                        *value = Value::from(u8::from(*b));
                    }
                }
                fields
            }
        }
    }
}

/// Everything the pipeline needs to know about one source kind.
pub struct SourceSpec {
    pub kind: SourceKind,
    pub mapper: Mapper,
    pub rules: RuleTable,
    /// Cumulative counters that must never be recorded as decreasing.
    pub monotonic: fn(&str) -> bool,
}

/// Route from an inbound source identifier to its collection and kind.
#[derive(Debug, Clone, Copy)]
pub struct SourceRoute {
    pub collection: &'static str,
    pub kind: SourceKind,
}

/// Maps inbound source identifiers to routes and kinds to specs.
pub struct SourceCatalog {
    routes: HashMap<&'static str, SourceRoute>,
    specs: HashMap<SourceKind, SourceSpec>,
}

impl SourceCatalog {
    /// Resolves an inbound source identifier. `None` means no storage target
    /// is configured for that source.
    pub fn route(&self, source_id: &str) -> Option<(&SourceRoute, &SourceSpec)> {
        let route = self.routes.get(source_id)?;
        let spec = self.specs.get(&route.kind)?;
        Some((route, spec))
    }

    pub fn spec(&self, kind: SourceKind) -> Option<&SourceSpec> {
        self.specs.get(&kind)
    }

    /// Every collection the catalog can write into, for schema bootstrap.
    pub fn collections(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.routes.values().map(|r| r.collection).collect();
        names.sort_unstable();
        names.dedup();
        names
    }

    /// The catalog of the plant this collector ships for.
    pub fn plant_default() -> Self {
        let mut routes = HashMap::new();
        const REACTOR_COLLECTIONS: [&str; 8] = [
            "reactor_1_data",
            "reactor_2_data",
            "reactor_3_data",
            "reactor_4_data",
            "reactor_5_data",
            "reactor_6_data",
            "reactor_7_data",
            "reactor_8_data",
        ];
        const REACTOR_IDS: [&str; 8] = [
            "PLC_1", "PLC_2", "PLC_3", "PLC_4", "PLC_5", "PLC_6", "PLC_7", "PLC_8",
        ];
        for (id, collection) in REACTOR_IDS.iter().zip(REACTOR_COLLECTIONS) {
            routes.insert(
                *id,
                SourceRoute {
                    collection,
                    kind: SourceKind::Reactor,
                },
            );
        }
        routes.insert(
            "PLC_TankFarm",
            SourceRoute {
                collection: "tank_farm_data",
                kind: SourceKind::TankFarm,
            },
        );
        routes.insert(
            "PLC_Scrubber1",
            SourceRoute {
                collection: "scrubber_1_data",
                kind: SourceKind::Scrubber,
            },
        );
        routes.insert(
            "PLC_Scrubber2",
            SourceRoute {
                collection: "scrubber_2_data",
                kind: SourceKind::Scrubber,
            },
        );
        routes.insert(
            "PLC_FilterPress",
            SourceRoute {
                collection: "filter_press_data",
                kind: SourceKind::FilterPress,
            },
        );
        routes.insert(
            "PLC_AuxiliaryFacilities",
            SourceRoute {
                collection: "auxiliary_facilities_data",
                kind: SourceKind::AuxiliaryFacilities,
            },
        );
        routes.insert(
            "PLC_NaturalGas",
            SourceRoute {
                collection: "natural_gas_meter_data",
                kind: SourceKind::GasMeter,
            },
        );
        routes.insert(
            "PLC_Electric",
            SourceRoute {
                collection: "electric_meter_data",
                kind: SourceKind::ElectricMeter,
            },
        );
        routes.insert(
            "PLC_Water",
            SourceRoute {
                collection: "water_meter_data",
                kind: SourceKind::WaterMeter,
            },
        );

        let mut specs = HashMap::new();
        specs.insert(
            SourceKind::Reactor,
            SourceSpec {
                kind: SourceKind::Reactor,
                mapper: Mapper::PassThrough,
                rules: reactor_rules(),
                monotonic: no_monotonic_fields,
            },
        );
        specs.insert(
            SourceKind::TankFarm,
            SourceSpec {
                kind: SourceKind::TankFarm,
                mapper: Mapper::BoolToNumeric,
                rules: tank_farm_rules(),
                monotonic: no_monotonic_fields,
            },
        );
        specs.insert(
            SourceKind::Scrubber,
            SourceSpec {
                kind: SourceKind::Scrubber,
                mapper: Mapper::PassThrough,
                rules: scrubber_rules(),
                monotonic: no_monotonic_fields,
            },
        );
        specs.insert(
            SourceKind::FilterPress,
            SourceSpec {
                kind: SourceKind::FilterPress,
                mapper: Mapper::PassThrough,
                rules: filter_press_rules(),
                monotonic: no_monotonic_fields,
            },
        );
        specs.insert(
            SourceKind::AuxiliaryFacilities,
            SourceSpec {
                kind: SourceKind::AuxiliaryFacilities,
                mapper: Mapper::PassThrough,
                rules: auxiliary_rules(),
                monotonic: no_monotonic_fields,
            },
        );
        specs.insert(
            SourceKind::GasMeter,
            SourceSpec {
                kind: SourceKind::GasMeter,
                mapper: Mapper::PassThrough,
                rules: gas_meter_rules(),
                monotonic: gas_monotonic,
            },
        );
        specs.insert(
            SourceKind::ElectricMeter,
            SourceSpec {
                kind: SourceKind::ElectricMeter,
                mapper: Mapper::PassThrough,
                rules: electric_meter_rules(),
                monotonic: electric_monotonic,
            },
        );
        specs.insert(
            SourceKind::WaterMeter,
            SourceSpec {
                kind: SourceKind::WaterMeter,
                mapper: Mapper::PassThrough,
                rules: water_meter_rules(),
                monotonic: water_monotonic,
            },
        );

        SourceCatalog { routes, specs }
    }
}

fn no_monotonic_fields(_: &str) -> bool {
    false
}

/// Electric meter registers accumulate consumed energy.
fn electric_monotonic(field: &str) -> bool {
    field.ends_with("_Counter") || field.ends_with("_Inductive") || field.ends_with("_Capacitive")
}

/// Gas correctors expose cumulative corrected/uncorrected volume.
fn gas_monotonic(field: &str) -> bool {
    field.ends_with("_UncorrectedVolume_M3") || field.ends_with("_CorrectedVolume_Sm3")
}

/// Water meters expose a totalizer index and a cumulative volume register.
fn water_monotonic(field: &str) -> bool {
    field.ends_with("_TotalIndex") || field.ends_with("_TotalVolume_M3")
}

fn range(places: i32, min: f64, max: f64) -> FieldRule {
    FieldRule::Range { places, min, max }
}

/// Tri-state indicator lamps: 0 off, 1 running, 2 fault.
fn lamp() -> FieldRule {
    FieldRule::Enum {
        allowed: vec![0, 1, 2],
    }
}

/// Two-state contacts (valves, sockets) after boolean mapping.
fn contact() -> FieldRule {
    FieldRule::Enum {
        allowed: vec![0, 1],
    }
}

fn reactor_rules() -> RuleTable {
    let mut rules = RuleTable::new();
    for name in [
        "Temperature",
        "SetTemperature",
        "ColumnTemperature",
        "ColumnSetTemperature",
        "HeatExchangerOutTemperature",
        "HotOilInletTemperature",
        "HotOilOutletTemperature",
    ] {
        rules.insert(name.to_string(), range(1, -350.0, 350.0));
    }
    rules.insert("Pressure".to_string(), range(2, -5.0, 5.0));
    rules.insert("Cooling3WayValveRatio".to_string(), range(0, -100.0, 100.0));
    rules.insert("Heating3WayValveRatio".to_string(), range(0, -100.0, 100.0));
    rules.insert("VacuumPumpMaxRatio".to_string(), range(1, -100.0, 100.0));
    rules.insert("HotOilFlowmeter".to_string(), range(0, -200.0, 200.0));
    rules.insert("HotOilFrequency".to_string(), range(1, -60.0, 60.0));
    rules.insert("TransferPumpRpm".to_string(), range(0, -5000.0, 5000.0));
    rules.insert("TransferPumpCurrent".to_string(), range(1, -500.0, 500.0));
    rules.insert("MixerRpm".to_string(), range(0, -100.0, 100.0));
    rules.insert("MixerCurrent".to_string(), range(1, -500.0, 500.0));
    rules.insert("AlcoholFlowmeter".to_string(), range(1, -20000.0, 20000.0));
    rules.insert("ProcessLevel".to_string(), range(0, -15.0, 15.0));
    for name in [
        "LampHeating",
        "LampMixer",
        "LampVacuum",
        "LampHotOilPump",
        "LampColumnCoolingPump",
        "LampFirstSeparator",
        "LampSecondSeparator",
        "LampAlcoholValve",
        "LampTransferPump",
        "LampFault",
    ] {
        rules.insert(name.to_string(), lamp());
    }
    rules
}

fn tank_farm_rules() -> RuleTable {
    let mut rules = RuleTable::new();
    for tank in 1..=21 {
        rules.insert(format!("Tank_{tank}_Level_Percent"), range(1, 0.0, 100.0));
        rules.insert(format!("Tank_{tank}_Temperature"), range(1, -50.0, 150.0));
    }
    // Loading-bay valve contacts arrive as booleans and are mapped to 0/1.
    for name in [
        "Tank_4_LoadingValve",
        "Tank_5_LoadingValve",
        "Tank_6_LoadingValve",
        "Tank_12_LoadingValve",
        "Tank_13_LoadingValve",
        "Tank_14_LoadingValve",
        "Tank_19_LoadingValve",
        "Tank_20_LoadingValve",
        "Tank_21_LoadingValve",
        "AlcoholNorthSocket",
        "AlcoholSouthSocket",
    ] {
        rules.insert(name.to_string(), contact());
    }
    rules
}

fn scrubber_rules() -> RuleTable {
    let mut rules = RuleTable::new();
    rules.insert("FanCurrent".to_string(), range(1, 0.0, 500.0));
    rules.insert("FanFrequency".to_string(), range(1, 0.0, 60.0));
    rules.insert("CirculationPumpCurrent".to_string(), range(1, 0.0, 500.0));
    rules.insert("PhValue".to_string(), range(2, 0.0, 14.0));
    rules.insert("WashWaterLevel_Percent".to_string(), range(0, 0.0, 100.0));
    rules.insert("LampFan".to_string(), lamp());
    rules.insert("LampCirculationPump".to_string(), lamp());
    rules
}

fn filter_press_rules() -> RuleTable {
    let mut rules = RuleTable::new();
    rules.insert("FeedPumpPressure".to_string(), range(2, 0.0, 16.0));
    rules.insert("FeedPumpCurrent".to_string(), range(1, 0.0, 500.0));
    rules.insert("PlateShifterPosition".to_string(), range(0, 0.0, 200.0));
    rules.insert("CycleState".to_string(), lamp());
    rules.insert("LampFeedPump".to_string(), lamp());
    rules.insert("LampHydraulics".to_string(), lamp());
    rules
}

fn auxiliary_rules() -> RuleTable {
    let mut rules = RuleTable::new();
    rules.insert("CompressorPressure".to_string(), range(2, 0.0, 16.0));
    rules.insert("SteamBoilerPressure".to_string(), range(2, 0.0, 40.0));
    rules.insert(
        "ChillerSupplyTemperature".to_string(),
        range(1, -50.0, 50.0),
    );
    rules.insert(
        "ChillerReturnTemperature".to_string(),
        range(1, -50.0, 50.0),
    );
    rules.insert(
        "CoolingTowerBasinTemperature".to_string(),
        range(1, -50.0, 80.0),
    );
    rules.insert("LampCompressor".to_string(), lamp());
    rules.insert("LampSteamBoiler".to_string(), lamp());
    rules.insert("LampChiller".to_string(), lamp());
    rules
}

/// Gas corrector lines: one register block per metered line.
fn gas_meter_rules() -> RuleTable {
    let mut rules = RuleTable::new();
    for line in ["HotWater", "Boiler", "Annex"] {
        rules.insert(format!("{line}_Pressure_Bar"), range(3, 0.0, 100.0));
        rules.insert(format!("{line}_Temperature"), range(1, -50.0, 150.0));
        rules.insert(format!("{line}_ConversionFactor"), range(2, 0.0, 10.0));
        rules.insert(format!("{line}_CorrectorBattery_Percent"), range(1, 0.0, 100.0));
        rules.insert(format!("{line}_FlowRate_M3h"), range(1, 0.0, 10000.0));
        rules.insert(
            format!("{line}_CorrectedFlowRate_Sm3h"),
            range(1, 0.0, 10000.0),
        );
        rules.insert(format!("{line}_UncorrectedVolume_M3"), range(0, 0.0, 1e9));
        rules.insert(format!("{line}_CorrectedVolume_Sm3"), range(0, 0.0, 1e9));
    }
    rules
}

/// Electric meter register blocks, one per distribution group.
fn electric_meter_rules() -> RuleTable {
    const GROUPS: [&str; 18] = [
        "Main",
        "CoolingWater",
        "BoilerRoom",
        "Stabilizer",
        "Reactor_6",
        "Reactor_7",
        "HotOilPump",
        "ComfortChiller",
        "ProductionChiller",
        "FilterPress",
        "Scrubber_1",
        "Scrubber_2",
        "TankFarm",
        "Treatment",
        "Annex_Main",
        "Annex_BoilerRoom",
        "Annex_Fan",
        "Others",
    ];
    let mut rules = RuleTable::new();
    for group in GROUPS {
        // Cumulative energy registers get the widest band; the main feeder
        // meter counts an order of magnitude more than the group meters.
        let register_max = if group == "Main" { 1e10 } else { 1e9 };
        for register in ["Counter", "Inductive", "Capacitive"] {
            rules.insert(format!("{group}_{register}"), range(0, 0.0, register_max));
        }
        for phase in ["L1", "L2", "L3"] {
            rules.insert(format!("{group}_{phase}"), range(1, 0.0, 2000.0));
        }
        let voltage_max = if group == "Main" { 40000.0 } else { 300.0 };
        for phase in ["V1", "V2", "V3"] {
            rules.insert(format!("{group}_{phase}"), range(0, 0.0, voltage_max));
        }
        rules.insert(format!("{group}_Frequency"), range(0, 0.0, 60.0));
        rules.insert(format!("{group}_ActivePower"), range(1, 0.0, 2000.0));
    }
    for probe in 1..=3 {
        rules.insert(format!("Transformer_Temp{probe}"), range(1, -200.0, 200.0));
    }
    rules.insert("Transformer_TempRoom".to_string(), range(1, -200.0, 200.0));
    rules
}

fn water_meter_rules() -> RuleTable {
    let mut rules = RuleTable::new();
    for line in ["General", "CoolingTower", "Production"] {
        rules.insert(format!("{line}_FlowSpeed"), range(0, 0.0, 50.0));
        rules.insert(format!("{line}_VolumeFlow"), range(0, 0.0, 1000.0));
        rules.insert(format!("{line}_MassFlow"), range(0, 0.0, 1000.0));
        rules.insert(format!("{line}_OperatingTime"), range(1, 0.0, 1e9));
        rules.insert(format!("{line}_TotalIndex"), range(1, 0.0, 1e9));
        rules.insert(format!("{line}_TotalVolume_M3"), range(1, 0.0, 1e9));
    }
    rules
}
