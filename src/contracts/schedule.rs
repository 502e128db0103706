use chrono::{Duration, NaiveDate};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::contracts::validation::{to_int_safe, Coerced};
use crate::error::FieldErrors;
use crate::kinds::ContractType;

const SALE_MIDDLE_OFFSET_DAYS: i64 = 30;
const SALE_BALANCE_OFFSET_DAYS: i64 = 60;
const JEONSE_BALANCE_OFFSET_DAYS: i64 = 60;

/// Down payment, interim and balance of a sale. Each part is floored on its own, so the
/// parts may sum to slightly less than the total price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SaleSplit {
    pub price_total: i64,
    pub contract_amount: i64,
    pub middle_amount: i64,
    pub balance_amount: i64,
}

impl SaleSplit {
    pub fn new(price_total: i64) -> Option<Self> {
        let part = |percent: i64| price_total.checked_mul(percent).map(|scaled| scaled / 100);
        Some(Self {
            price_total,
            contract_amount: part(10)?,
            middle_amount: part(40)?,
            balance_amount: part(50)?,
        })
    }

    pub fn shortfall(&self) -> i64 {
        self.price_total - (self.contract_amount + self.middle_amount + self.balance_amount)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Amounts {
    Sale(SaleSplit),
    Jeonse {
        deposit: i64,
    },
    Monthly {
        deposit: i64,
        monthly_rent: i64,
        monthly_payday: i32,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Schedule {
    pub contract_date: NaiveDate,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub middle_date: Option<NaiveDate>,
    pub balance_date: NaiveDate,
    pub transfer_date: NaiveDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Terms {
    pub amounts: Amounts,
    pub schedule: Schedule,
}

impl Terms {
    /// Flat map merged into the persisted `schedule` column.
    pub fn to_schedule_map(&self) -> Map<String, Value> {
        let mut map = Map::new();
        for value in [
            serde_json::to_value(self.schedule),
            serde_json::to_value(self.amounts),
        ]
        .into_iter()
        .flatten()
        {
            if let Value::Object(entries) = value {
                map.extend(entries);
            }
        }
        map
    }

    /// Date the parties hand over the property.
    pub fn handover_date(&self) -> NaiveDate {
        self.schedule.transfer_date
    }
}

pub fn monthly_payday_or_default(raw: Option<&Value>) -> Result<i32, FieldErrors> {
    match to_int_safe(raw) {
        Coerced::Missing => Ok(1),
        Coerced::Value(day) if (1..=31).contains(&day) => Ok(day as i32),
        _ => Err(FieldErrors::single(
            "monthly_payday",
            "monthly_payday must be between 1 and 31",
        )),
    }
}

fn principal(money: &Map<String, Value>, keys: &[&str], field: &str) -> Result<i64, FieldErrors> {
    let raw = keys
        .iter()
        .find_map(|key| money.get(*key).filter(|value| !value.is_null()));
    match to_int_safe(raw) {
        Coerced::Value(amount) if amount >= 1 => Ok(amount),
        Coerced::Value(_) => Err(FieldErrors::single(
            field,
            format!("{field} must be greater than 0"),
        )),
        Coerced::Missing => Err(FieldErrors::single(field, format!("{field} is required"))),
        Coerced::Invalid => Err(FieldErrors::single(field, format!("{field} must be a number"))),
    }
}

/// Derives the payment breakdown and dates for `contract_type` relative to `today`.
pub fn compute_terms(
    contract_type: ContractType,
    money: &Map<String, Value>,
    today: NaiveDate,
) -> Result<Terms, FieldErrors> {
    match contract_type {
        ContractType::Sale => {
            let price_total = principal(money, &["price_total", "sale_price"], "sale_price")?;
            let split = SaleSplit::new(price_total).ok_or_else(|| {
                FieldErrors::single("sale_price", "sale_price is too large")
            })?;
            let balance = today + Duration::days(SALE_BALANCE_OFFSET_DAYS);
            Ok(Terms {
                amounts: Amounts::Sale(split),
                schedule: Schedule {
                    contract_date: today,
                    middle_date: Some(today + Duration::days(SALE_MIDDLE_OFFSET_DAYS)),
                    balance_date: balance,
                    transfer_date: balance,
                },
            })
        }
        ContractType::Jeonse => {
            let deposit = principal(money, &["deposit"], "deposit")?;
            let balance = today + Duration::days(JEONSE_BALANCE_OFFSET_DAYS);
            Ok(Terms {
                amounts: Amounts::Jeonse { deposit },
                schedule: Schedule {
                    contract_date: today,
                    middle_date: None,
                    balance_date: balance,
                    transfer_date: balance,
                },
            })
        }
        ContractType::Wolse | ContractType::Banjeonse => {
            let mut errors = FieldErrors::new();
            let deposit = principal(money, &["deposit"], "deposit")
                .map_err(|err| errors.merge(err))
                .ok();
            let monthly_rent = principal(money, &["monthly_rent"], "monthly_rent")
                .map_err(|err| errors.merge(err))
                .ok();
            let monthly_payday = monthly_payday_or_default(money.get("monthly_payday"))
                .map_err(|err| errors.merge(err))
                .ok();
            match (deposit, monthly_rent, monthly_payday) {
                (Some(deposit), Some(monthly_rent), Some(monthly_payday)) => Ok(Terms {
                    amounts: Amounts::Monthly {
                        deposit,
                        monthly_rent,
                        monthly_payday,
                    },
                    schedule: Schedule {
                        contract_date: today,
                        middle_date: None,
                        balance_date: today,
                        transfer_date: today,
                    },
                }),
                _ => Err(errors),
            }
        }
    }
}
