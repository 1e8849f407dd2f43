use crate::domain::checkout::{CheckoutLine, CreateCheckout};
use crate::domain::payment::PaymentMethod;
use crate::error::{PaymentError, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::io::Read;

/// One CSV row: a single cart line of the order named by `order`.
///
/// Ids are kept as raw strings so they go through the same validation as
/// any other caller input.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OrderLine {
    pub order: String,
    pub user_id: String,
    pub product_id: String,
    pub quantity: u32,
    pub method: String,
    #[serde(default)]
    pub transaction_id: Option<String>,
}

/// All lines of one order, ready to become a checkout and a payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub reference: String,
    pub checkout: CreateCheckout,
    pub method: PaymentMethod,
    pub transaction_id: Option<String>,
}

/// Reads order lines from a CSV source with the header
/// `order,user_id,product_id,quantity,method[,transaction_id]`.
pub struct OrderReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> OrderReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    pub fn lines(self) -> impl Iterator<Item = Result<OrderLine>> {
        self.reader
            .into_deserialize()
            .map(|result| result.map_err(PaymentError::from))
    }
}

/// Groups lines by order reference, keeping the order of first appearance.
///
/// The user, method and transaction id of an order come from its first line.
pub fn group_orders(lines: impl IntoIterator<Item = OrderLine>) -> Result<Vec<Order>> {
    let mut orders: Vec<Order> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for line in lines {
        let item = CheckoutLine::new(line.product_id, line.quantity);
        match index.get(&line.order) {
            Some(&position) => orders[position].checkout.items.push(item),
            None => {
                let method: PaymentMethod = line.method.parse()?;
                index.insert(line.order.clone(), orders.len());
                orders.push(Order {
                    reference: line.order,
                    checkout: CreateCheckout {
                        user_id: line.user_id,
                        items: vec![item],
                    },
                    method,
                    transaction_id: line.transaction_id.filter(|id| !id.is_empty()),
                });
            }
        }
    }
    Ok(orders)
}
