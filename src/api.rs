//! Typed shortcuts for the WebSocket API methods.
//!
//! Parameters and results are passed through as JSON; see the venue's
//! WebSocket API reference for the fields each method takes.

use serde_json::Value;

use crate::error::Result;
use crate::session::Session;
use crate::types::Params;

impl Session {
    /// Venue clock in epoch milliseconds.
    pub async fn time(&self) -> Result<u64> {
        self.requester().server_time().await
    }

    /// Connectivity check.
    pub async fn ping(&self) -> Result<Value> {
        self.public_request("ping", Params::new()).await
    }

    pub async fn exchange_info(&self, params: Params) -> Result<Value> {
        self.public_request("exchangeInfo", params).await
    }

    /// Validate an order without placing it.
    pub async fn order_test(&self, params: Params) -> Result<Value> {
        self.private_request("order.test", params).await
    }

    pub async fn order(&self, params: Params) -> Result<Value> {
        self.private_request("order.place", params).await
    }

    pub async fn get_order(&self, params: Params) -> Result<Value> {
        self.private_request("order.status", params).await
    }

    pub async fn cancel_order(&self, params: Params) -> Result<Value> {
        self.private_request("order.cancel", params).await
    }

    pub async fn cancel_replace_order(&self, params: Params) -> Result<Value> {
        self.private_request("order.cancelReplace", params).await
    }

    pub async fn open_orders(&self, params: Params) -> Result<Value> {
        self.private_request("openOrders.status", params).await
    }

    pub async fn cancel_open_orders(&self, params: Params) -> Result<Value> {
        self.private_request("openOrders.cancelAll", params).await
    }

    pub async fn order_oco(&self, params: Params) -> Result<Value> {
        self.private_request("orderList.place", params).await
    }

    pub async fn get_order_oco(&self, params: Params) -> Result<Value> {
        self.private_request("orderList.status", params).await
    }

    pub async fn cancel_order_oco(&self, params: Params) -> Result<Value> {
        self.private_request("orderList.cancel", params).await
    }

    pub async fn open_orders_oco(&self, params: Params) -> Result<Value> {
        self.private_request("openOrderLists.status", params).await
    }

    pub async fn account_info(&self) -> Result<Value> {
        self.private_request("account.status", Params::new()).await
    }

    /// Unfilled order counts per interval.
    pub async fn order_rate_limits(&self) -> Result<Value> {
        self.private_request("account.rateLimits.orders", Params::new())
            .await
    }

    pub async fn all_orders(&self, params: Params) -> Result<Value> {
        self.private_request("allOrders", params).await
    }

    pub async fn all_orders_oco(&self, params: Params) -> Result<Value> {
        self.private_request("allOrderLists", params).await
    }

    pub async fn my_trades(&self, params: Params) -> Result<Value> {
        self.private_request("myTrades", params).await
    }

    /// Orders expired by self-trade prevention.
    pub async fn my_prevented_matches(&self, params: Params) -> Result<Value> {
        self.private_request("myPreventedMatches", params).await
    }
}
