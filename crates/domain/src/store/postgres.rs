use std::collections::HashMap;

use async_trait::async_trait;
use chrono::NaiveDate;
use common::{Discount, ItemId, Money, PaymentId, Quantity, ReservationId, SaleId};
use sqlx::{PgConnection, PgPool, Postgres, Row, Transaction, postgres::PgRow};
use uuid::Uuid;

use super::{Store, StoreResult, StoreTx};
use crate::error::StoreError;
use crate::inventory::{
    InventoryItem, ItemSnapshot, Reservation, ReservationState, ReservationToken, derive_status,
};
use crate::payment::{Payment, PaymentSnapshot, PaymentStatus};
use crate::sale::{Closure, InvoiceNumber, Sale, SaleLineItem, SaleSnapshot};

const ITEM_COLUMNS: &str = "SELECT id, description, source_location, quantity_total, quantity_available, unit_cost_cents, unit_price_cents, created_at, updated_at FROM inventory_items";

const SALE_COLUMNS: &str = "SELECT id, invoice_number, state, customer, notes, seller, discount_basis_points, subtotal_cents, final_total_cents, created_at, updated_at, voided_at, voided_by, void_reason, deleted_at, deleted_by FROM sales";

const PAYMENT_COLUMNS: &str = "SELECT id, sale_id, method, amount_cents, status, received_by, notes, recorded_at, recorded_by, confirmed_at, confirmed_by, rejected_at, rejected_by, rejection_reason FROM payments";

/// PostgreSQL-backed store.
///
/// `*_for_update` reads take row locks with `SELECT ... FOR UPDATE`, so two
/// transactions touching the same record are serialized by the database as
/// well as by the caller.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Creates a new PostgreSQL store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs database migrations.
    pub async fn run_migrations(&self) -> StoreResult<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        tracing::info!("database migrations applied");
        Ok(())
    }
}

#[async_trait]
impl Store for PostgresStore {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTx>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PostgresTx {
            tx,
            pool: self.pool.clone(),
        }))
    }

    async fn get_item(&self, id: ItemId) -> StoreResult<Option<InventoryItem>> {
        let mut conn = self.pool.acquire().await?;
        load_item(&mut conn, id, false).await
    }

    async fn get_sale(&self, id: SaleId) -> StoreResult<Option<Sale>> {
        let mut conn = self.pool.acquire().await?;
        Ok(load_sales(&mut conn, SaleQuery::ById(id, false)).await?.pop())
    }

    async fn get_payment(&self, id: PaymentId) -> StoreResult<Option<Payment>> {
        let mut conn = self.pool.acquire().await?;
        Ok(load_payments(&mut conn, PaymentQuery::ById(id, false)).await?.pop())
    }

    async fn list_items(&self) -> StoreResult<Vec<InventoryItem>> {
        let mut conn = self.pool.acquire().await?;
        load_all_items(&mut conn).await
    }

    async fn list_sales(&self) -> StoreResult<Vec<Sale>> {
        let mut conn = self.pool.acquire().await?;
        load_sales(&mut conn, SaleQuery::All).await
    }

    async fn list_payments(&self) -> StoreResult<Vec<Payment>> {
        let mut conn = self.pool.acquire().await?;
        load_payments(&mut conn, PaymentQuery::All).await
    }

    async fn payments_with_status(&self, status: PaymentStatus) -> StoreResult<Vec<Payment>> {
        let mut conn = self.pool.acquire().await?;
        load_payments(&mut conn, PaymentQuery::WithStatus(status)).await
    }

    async fn payments_for_sale(&self, sale_id: SaleId) -> StoreResult<Vec<Payment>> {
        let mut conn = self.pool.acquire().await?;
        load_payments(&mut conn, PaymentQuery::ForSale(sale_id, false)).await
    }

    async fn sales_for_item(&self, item_id: ItemId) -> StoreResult<Vec<Sale>> {
        let mut conn = self.pool.acquire().await?;
        load_sales(&mut conn, SaleQuery::ForItem(item_id)).await
    }
}

struct PostgresTx {
    tx: Transaction<'static, Postgres>,
    /// Used for statements that must not hold locks until commit.
    pool: PgPool,
}

#[async_trait]
impl StoreTx for PostgresTx {
    async fn item_for_update(&mut self, id: ItemId) -> StoreResult<Option<InventoryItem>> {
        load_item(&mut self.tx, id, true).await
    }

    async fn sale_for_update(&mut self, id: SaleId) -> StoreResult<Option<Sale>> {
        Ok(load_sales(&mut self.tx, SaleQuery::ById(id, true)).await?.pop())
    }

    async fn payment_for_update(&mut self, id: PaymentId) -> StoreResult<Option<Payment>> {
        Ok(load_payments(&mut self.tx, PaymentQuery::ById(id, true)).await?.pop())
    }

    async fn payments_for_sale(&mut self, sale_id: SaleId) -> StoreResult<Vec<Payment>> {
        load_payments(&mut self.tx, PaymentQuery::ForSale(sale_id, true)).await
    }

    async fn sales_for_item(&mut self, item_id: ItemId) -> StoreResult<Vec<Sale>> {
        load_sales(&mut self.tx, SaleQuery::ForItem(item_id)).await
    }

    async fn save_item(&mut self, item: &InventoryItem) -> StoreResult<()> {
        let id = item.id();
        let quantity_total = to_i32("item", id, "quantity_total", item.quantity_total())?;
        let quantity_available =
            to_i32("item", id, "quantity_available", item.quantity_available())?;

        sqlx::query(
            r#"
            INSERT INTO inventory_items
                (id, description, source_location, quantity_total, quantity_available,
                 unit_cost_cents, unit_price_cents, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (id) DO UPDATE SET
                description = EXCLUDED.description,
                source_location = EXCLUDED.source_location,
                quantity_total = EXCLUDED.quantity_total,
                quantity_available = EXCLUDED.quantity_available,
                unit_cost_cents = EXCLUDED.unit_cost_cents,
                unit_price_cents = EXCLUDED.unit_price_cents,
                status = EXCLUDED.status,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(item.id().as_uuid())
        .bind(item.description())
        .bind(item.source_location())
        .bind(quantity_total)
        .bind(quantity_available)
        .bind(item.unit_cost().cents())
        .bind(item.unit_price().cents())
        .bind(item.status().as_str())
        .bind(item.created_at())
        .bind(item.updated_at())
        .execute(&mut *self.tx)
        .await?;

        save_reservations(&mut self.tx, item).await
    }

    async fn save_sale(&mut self, sale: &Sale) -> StoreResult<()> {
        let voided = sale.voided();
        let deleted = sale.deleted();
        let discount = to_i32(
            "sale",
            sale.id(),
            "discount_basis_points",
            sale.discount().basis_points(),
        )?;

        sqlx::query(
            r#"
            INSERT INTO sales
                (id, invoice_number, state, customer, notes, seller, discount_basis_points,
                 subtotal_cents, final_total_cents, created_at, updated_at,
                 voided_at, voided_by, void_reason, deleted_at, deleted_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            ON CONFLICT (id) DO UPDATE SET
                state = EXCLUDED.state,
                customer = EXCLUDED.customer,
                notes = EXCLUDED.notes,
                discount_basis_points = EXCLUDED.discount_basis_points,
                subtotal_cents = EXCLUDED.subtotal_cents,
                final_total_cents = EXCLUDED.final_total_cents,
                updated_at = EXCLUDED.updated_at,
                voided_at = EXCLUDED.voided_at,
                voided_by = EXCLUDED.voided_by,
                void_reason = EXCLUDED.void_reason,
                deleted_at = EXCLUDED.deleted_at,
                deleted_by = EXCLUDED.deleted_by
            "#,
        )
        .bind(sale.id().as_uuid())
        .bind(sale.invoice_number().as_str())
        .bind(sale.state().as_str())
        .bind(sale.customer())
        .bind(sale.notes())
        .bind(sale.seller())
        .bind(discount)
        .bind(sale.subtotal().cents())
        .bind(sale.final_total().cents())
        .bind(sale.created_at())
        .bind(sale.updated_at())
        .bind(voided.map(|c| c.at))
        .bind(voided.map(|c| c.by.as_str()))
        .bind(voided.and_then(|c| c.reason.as_deref()))
        .bind(deleted.map(|c| c.at))
        .bind(deleted.map(|c| c.by.as_str()))
        .execute(&mut *self.tx)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.constraint() == Some("sales_invoice_number_key")
            {
                return StoreError::Conflict(format!(
                    "invoice number {} is already taken",
                    sale.invoice_number()
                ));
            }
            StoreError::Database(e)
        })?;

        sqlx::query("DELETE FROM sale_line_items WHERE sale_id = $1")
            .bind(sale.id().as_uuid())
            .execute(&mut *self.tx)
            .await?;

        for (position, line) in sale.line_items().iter().enumerate() {
            let position = to_i32("sale", sale.id(), "line position", position)?;
            let quantity = to_i32("sale", sale.id(), "quantity_sold", line.quantity_sold.get())?;
            sqlx::query(
                r#"
                INSERT INTO sale_line_items
                    (sale_id, position, item_id, description, quantity_sold, unit_price_cents, reservation_id)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(sale.id().as_uuid())
            .bind(position)
            .bind(line.item_id.as_uuid())
            .bind(&line.description)
            .bind(quantity)
            .bind(line.unit_price_at_sale.cents())
            .bind(line.reservation.reservation_id.as_uuid())
            .execute(&mut *self.tx)
            .await?;
        }

        Ok(())
    }

    async fn save_payment(&mut self, payment: &Payment) -> StoreResult<()> {
        let p = payment.snapshot();
        sqlx::query(
            r#"
            INSERT INTO payments
                (id, sale_id, method, amount_cents, status, received_by, notes, recorded_at,
                 recorded_by, confirmed_at, confirmed_by, rejected_at, rejected_by, rejection_reason)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            ON CONFLICT (id) DO UPDATE SET
                status = EXCLUDED.status,
                notes = EXCLUDED.notes,
                confirmed_at = EXCLUDED.confirmed_at,
                confirmed_by = EXCLUDED.confirmed_by,
                rejected_at = EXCLUDED.rejected_at,
                rejected_by = EXCLUDED.rejected_by,
                rejection_reason = EXCLUDED.rejection_reason
            "#,
        )
        .bind(p.id.as_uuid())
        .bind(p.sale_id.as_uuid())
        .bind(p.method.as_str())
        .bind(p.amount.cents())
        .bind(p.status.as_str())
        .bind(&p.received_by)
        .bind(&p.notes)
        .bind(p.recorded_at)
        .bind(&p.recorded_by)
        .bind(p.confirmed_at)
        .bind(&p.confirmed_by)
        .bind(p.rejected_at)
        .bind(&p.rejected_by)
        .bind(&p.rejection_reason)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.constraint() == Some("idx_payments_one_pending")
            {
                return StoreError::Conflict(format!(
                    "sale {} already has a pending payment",
                    p.sale_id
                ));
            }
            StoreError::Database(e)
        })?;

        Ok(())
    }

    async fn delete_item(&mut self, id: ItemId) -> StoreResult<()> {
        sqlx::query("DELETE FROM inventory_items WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    /// Runs on its own connection so the per-day row lock is released as soon
    /// as the number is taken. A rolled back sale leaves a gap.
    async fn next_invoice_sequence(&mut self, day: NaiveDate) -> StoreResult<u32> {
        let value: i32 = sqlx::query_scalar(
            r#"
            INSERT INTO invoice_sequences (day, last_value) VALUES ($1, 1)
            ON CONFLICT (day) DO UPDATE SET last_value = invoice_sequences.last_value + 1
            RETURNING last_value
            "#,
        )
        .bind(day)
        .fetch_one(&self.pool)
        .await?;
        tracing::debug!(%day, value, "invoice sequence taken");
        to_u32("invoice_sequence", day, "last_value", value)
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        tracing::debug!("rolling back store transaction");
        self.tx.rollback().await?;
        Ok(())
    }
}

fn corrupt(entity: &'static str, id: impl ToString, reason: impl ToString) -> StoreError {
    StoreError::Corrupt {
        entity,
        id: id.to_string(),
        reason: reason.to_string(),
    }
}

fn to_u32(entity: &'static str, id: impl ToString, column: &str, value: i32) -> StoreResult<u32> {
    u32::try_from(value).map_err(|_| corrupt(entity, id, format!("{column} is {value}")))
}

fn to_i32<T>(entity: &'static str, id: impl ToString, column: &str, value: T) -> StoreResult<i32>
where
    T: TryInto<i32> + std::fmt::Display + Copy,
{
    value.try_into().map_err(|_| StoreError::OutOfRange {
        entity,
        id: id.to_string(),
        reason: format!("{column} {value} exceeds {}", i32::MAX),
    })
}

fn to_quantity(entity: &'static str, id: impl ToString, column: &str, value: i32) -> StoreResult<Quantity> {
    let units = to_u32(entity, id.to_string(), column, value)?;
    Quantity::new(units).map_err(|e| corrupt(entity, id, e))
}

// Items

async fn load_item(
    conn: &mut PgConnection,
    id: ItemId,
    for_update: bool,
) -> StoreResult<Option<InventoryItem>> {
    let lock = if for_update { " FOR UPDATE" } else { "" };
    let sql = format!("{ITEM_COLUMNS} WHERE id = $1{lock}");
    let Some(row) = sqlx::query(&sql)
        .bind(id.as_uuid())
        .fetch_optional(&mut *conn)
        .await?
    else {
        return Ok(None);
    };

    let mut reservations = load_reservations(conn, Some(id)).await?;
    let item = row_to_item(&row, reservations.remove(&id).unwrap_or_default())?;
    Ok(Some(item))
}

/// Writes an item's reservations in one statement.
///
/// Rows whose position, quantity and state are unchanged are left alone, so
/// a save only writes the reservations a ledger step actually touched.
/// Reservations the item no longer carries are removed.
async fn save_reservations(conn: &mut PgConnection, item: &InventoryItem) -> StoreResult<()> {
    let reservations = item.reservations();
    let mut ids = Vec::with_capacity(reservations.len());
    let mut positions = Vec::with_capacity(reservations.len());
    let mut sale_ids = Vec::with_capacity(reservations.len());
    let mut quantities = Vec::with_capacity(reservations.len());
    let mut states = Vec::with_capacity(reservations.len());
    let mut created = Vec::with_capacity(reservations.len());
    for (position, r) in reservations.iter().enumerate() {
        ids.push(r.id.as_uuid());
        positions.push(to_i32("reservation", r.id, "position", position)?);
        sale_ids.push(r.sale_id.as_uuid());
        quantities.push(to_i32("reservation", r.id, "quantity", r.quantity.get())?);
        states.push(r.state.as_str());
        created.push(r.created_at);
    }

    sqlx::query("DELETE FROM reservations WHERE item_id = $1 AND NOT (id = ANY($2))")
        .bind(item.id().as_uuid())
        .bind(&ids)
        .execute(&mut *conn)
        .await?;

    if ids.is_empty() {
        return Ok(());
    }

    sqlx::query(
        r#"
        INSERT INTO reservations (id, item_id, position, sale_id, quantity, state, created_at)
        SELECT r.id, $1, r.position, r.sale_id, r.quantity, r.state, r.created_at
        FROM UNNEST($2::uuid[], $3::int4[], $4::uuid[], $5::int4[], $6::text[], $7::timestamptz[])
            AS r (id, position, sale_id, quantity, state, created_at)
        ON CONFLICT (id) DO UPDATE SET
            position = EXCLUDED.position,
            quantity = EXCLUDED.quantity,
            state = EXCLUDED.state
        WHERE (reservations.position, reservations.quantity, reservations.state)
            IS DISTINCT FROM (EXCLUDED.position, EXCLUDED.quantity, EXCLUDED.state)
        "#,
    )
    .bind(item.id().as_uuid())
    .bind(&ids)
    .bind(&positions)
    .bind(&sale_ids)
    .bind(&quantities)
    .bind(&states)
    .bind(&created)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

async fn load_all_items(conn: &mut PgConnection) -> StoreResult<Vec<InventoryItem>> {
    let sql = format!("{ITEM_COLUMNS} ORDER BY created_at ASC, id ASC");
    let rows = sqlx::query(&sql).fetch_all(&mut *conn).await?;
    let mut reservations = load_reservations(conn, None).await?;

    rows.iter()
        .map(|row| {
            let id = ItemId::from_uuid(row.try_get("id")?);
            row_to_item(row, reservations.remove(&id).unwrap_or_default())
        })
        .collect()
}

async fn load_reservations(
    conn: &mut PgConnection,
    item_id: Option<ItemId>,
) -> StoreResult<HashMap<ItemId, Vec<Reservation>>> {
    let mut sql = String::from(
        "SELECT id, item_id, sale_id, quantity, state, created_at FROM reservations",
    );
    if item_id.is_some() {
        sql.push_str(" WHERE item_id = $1");
    }
    sql.push_str(" ORDER BY item_id, position");

    let mut query = sqlx::query(&sql);
    if let Some(item_id) = item_id {
        query = query.bind(item_id.as_uuid());
    }
    let rows = query.fetch_all(&mut *conn).await?;

    let mut by_item: HashMap<ItemId, Vec<Reservation>> = HashMap::new();
    for row in rows {
        let id = ReservationId::from_uuid(row.try_get("id")?);
        let item_id = ItemId::from_uuid(row.try_get("item_id")?);
        let state: String = row.try_get("state")?;
        let reservation = Reservation {
            id,
            sale_id: SaleId::from_uuid(row.try_get("sale_id")?),
            quantity: to_quantity("reservation", id, "quantity", row.try_get("quantity")?)?,
            state: state.parse().map_err(|e| corrupt("reservation", id, e))?,
            created_at: row.try_get("created_at")?,
        };
        by_item.entry(item_id).or_default().push(reservation);
    }
    Ok(by_item)
}

fn row_to_item(row: &PgRow, reservations: Vec<Reservation>) -> StoreResult<InventoryItem> {
    let id = ItemId::from_uuid(row.try_get("id")?);
    let quantity_available = to_u32("item", id, "quantity_available", row.try_get("quantity_available")?)?;
    let held = reservations
        .iter()
        .filter(|r| r.state == ReservationState::Held)
        .map(|r| r.quantity.get())
        .sum();
    let committed = reservations
        .iter()
        .filter(|r| r.state == ReservationState::Committed)
        .map(|r| r.quantity.get())
        .sum();

    Ok(InventoryItem::from(ItemSnapshot {
        id,
        description: row.try_get("description")?,
        source_location: row.try_get("source_location")?,
        status: derive_status(quantity_available, held),
        quantity_total: to_u32("item", id, "quantity_total", row.try_get("quantity_total")?)?,
        quantity_available,
        quantity_held: held,
        quantity_committed: committed,
        unit_cost: Money::from_cents(row.try_get("unit_cost_cents")?),
        unit_price: Money::from_cents(row.try_get("unit_price_cents")?),
        reservations,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    }))
}

// Sales

enum SaleQuery {
    ById(SaleId, bool),
    ForItem(ItemId),
    All,
}

async fn load_sales(conn: &mut PgConnection, query: SaleQuery) -> StoreResult<Vec<Sale>> {
    let sql = match &query {
        SaleQuery::ById(_, true) => format!("{SALE_COLUMNS} WHERE id = $1 FOR UPDATE"),
        SaleQuery::ById(_, false) => format!("{SALE_COLUMNS} WHERE id = $1"),
        SaleQuery::ForItem(_) => format!(
            "{SALE_COLUMNS} WHERE id IN (SELECT sale_id FROM sale_line_items WHERE item_id = $1) \
             ORDER BY created_at ASC, id ASC"
        ),
        SaleQuery::All => format!("{SALE_COLUMNS} ORDER BY created_at ASC, id ASC"),
    };

    let mut q = sqlx::query(&sql);
    match query {
        SaleQuery::ById(id, _) => q = q.bind(id.as_uuid()),
        SaleQuery::ForItem(item_id) => q = q.bind(item_id.as_uuid()),
        SaleQuery::All => {}
    }
    let rows = q.fetch_all(&mut *conn).await?;
    if rows.is_empty() {
        return Ok(Vec::new());
    }

    let ids: Vec<Uuid> = rows
        .iter()
        .map(|row| row.try_get("id"))
        .collect::<Result<_, _>>()?;
    let mut lines = load_line_items(conn, &ids).await?;

    rows.iter()
        .map(|row| {
            let id = SaleId::from_uuid(row.try_get("id")?);
            row_to_sale(row, lines.remove(&id).unwrap_or_default())
        })
        .collect()
}

async fn load_line_items(
    conn: &mut PgConnection,
    sale_ids: &[Uuid],
) -> StoreResult<HashMap<SaleId, Vec<SaleLineItem>>> {
    let rows = sqlx::query(
        r#"
        SELECT sale_id, item_id, description, quantity_sold, unit_price_cents, reservation_id
        FROM sale_line_items
        WHERE sale_id = ANY($1)
        ORDER BY sale_id, position
        "#,
    )
    .bind(sale_ids)
    .fetch_all(&mut *conn)
    .await?;

    let mut by_sale: HashMap<SaleId, Vec<SaleLineItem>> = HashMap::new();
    for row in rows {
        let sale_id = SaleId::from_uuid(row.try_get("sale_id")?);
        let item_id = ItemId::from_uuid(row.try_get("item_id")?);
        let line = SaleLineItem {
            item_id,
            description: row.try_get("description")?,
            quantity_sold: to_quantity("sale", sale_id, "quantity_sold", row.try_get("quantity_sold")?)?,
            unit_price_at_sale: Money::from_cents(row.try_get("unit_price_cents")?),
            reservation: ReservationToken {
                reservation_id: ReservationId::from_uuid(row.try_get("reservation_id")?),
                item_id,
            },
        };
        by_sale.entry(sale_id).or_default().push(line);
    }
    Ok(by_sale)
}

fn closure(
    at: Option<chrono::DateTime<chrono::Utc>>,
    by: Option<String>,
    reason: Option<String>,
) -> Option<Closure> {
    at.map(|at| Closure {
        at,
        by: by.unwrap_or_default(),
        reason,
    })
}

fn row_to_sale(row: &PgRow, line_items: Vec<SaleLineItem>) -> StoreResult<Sale> {
    let id = SaleId::from_uuid(row.try_get("id")?);
    let invoice: String = row.try_get("invoice_number")?;
    let state: String = row.try_get("state")?;
    let basis_points = to_u32("sale", id, "discount_basis_points", row.try_get("discount_basis_points")?)?;

    Ok(Sale::from(SaleSnapshot {
        id,
        invoice_number: InvoiceNumber::try_from(invoice).map_err(|e| corrupt("sale", id, e))?,
        state: state.parse().map_err(|e| corrupt("sale", id, e))?,
        customer: row.try_get("customer")?,
        notes: row.try_get("notes")?,
        seller: row.try_get("seller")?,
        line_items,
        discount: Discount::from_basis_points(basis_points).map_err(|e| corrupt("sale", id, e))?,
        subtotal: Money::from_cents(row.try_get("subtotal_cents")?),
        final_total: Money::from_cents(row.try_get("final_total_cents")?),
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        voided: closure(
            row.try_get("voided_at")?,
            row.try_get("voided_by")?,
            row.try_get("void_reason")?,
        ),
        deleted: closure(row.try_get("deleted_at")?, row.try_get("deleted_by")?, None),
    }))
}

// Payments

enum PaymentQuery {
    ById(PaymentId, bool),
    ForSale(SaleId, bool),
    WithStatus(PaymentStatus),
    All,
}

async fn load_payments(conn: &mut PgConnection, query: PaymentQuery) -> StoreResult<Vec<Payment>> {
    let order = " ORDER BY recorded_at ASC, id ASC";
    let sql = match &query {
        PaymentQuery::ById(_, true) => format!("{PAYMENT_COLUMNS} WHERE id = $1 FOR UPDATE"),
        PaymentQuery::ById(_, false) => format!("{PAYMENT_COLUMNS} WHERE id = $1"),
        PaymentQuery::ForSale(_, true) => {
            format!("{PAYMENT_COLUMNS} WHERE sale_id = $1{order} FOR UPDATE")
        }
        PaymentQuery::ForSale(_, false) => format!("{PAYMENT_COLUMNS} WHERE sale_id = $1{order}"),
        PaymentQuery::WithStatus(_) => format!("{PAYMENT_COLUMNS} WHERE status = $1{order}"),
        PaymentQuery::All => format!("{PAYMENT_COLUMNS}{order}"),
    };

    let mut q = sqlx::query(&sql);
    match query {
        PaymentQuery::ById(id, _) => q = q.bind(id.as_uuid()),
        PaymentQuery::ForSale(sale_id, _) => q = q.bind(sale_id.as_uuid()),
        PaymentQuery::WithStatus(status) => q = q.bind(status.as_str()),
        PaymentQuery::All => {}
    }

    let rows = q.fetch_all(&mut *conn).await?;
    rows.iter().map(row_to_payment).collect()
}

fn row_to_payment(row: &PgRow) -> StoreResult<Payment> {
    let id = PaymentId::from_uuid(row.try_get("id")?);
    let method: String = row.try_get("method")?;
    let status: String = row.try_get("status")?;

    Ok(Payment::from(PaymentSnapshot {
        id,
        sale_id: SaleId::from_uuid(row.try_get("sale_id")?),
        method: method.parse().map_err(|e| corrupt("payment", id, e))?,
        amount: Money::from_cents(row.try_get("amount_cents")?),
        status: status.parse().map_err(|e| corrupt("payment", id, e))?,
        received_by: row.try_get("received_by")?,
        notes: row.try_get("notes")?,
        recorded_at: row.try_get("recorded_at")?,
        recorded_by: row.try_get("recorded_by")?,
        confirmed_at: row.try_get("confirmed_at")?,
        confirmed_by: row.try_get("confirmed_by")?,
        rejected_at: row.try_get("rejected_at")?,
        rejected_by: row.try_get("rejected_by")?,
        rejection_reason: row.try_get("rejection_reason")?,
    }))
}
