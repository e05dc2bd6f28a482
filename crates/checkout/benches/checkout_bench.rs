use checkout::{
    CheckoutConfig, CheckoutOrchestrator, CheckoutRequest, InMemoryPaymentGateway,
    InMemoryReconciliationLog,
};
use criterion::{Criterion, criterion_group, criterion_main};
use domain::{CartLine, CustomerId, Money, Sku};
use storage::{CartStore, InMemoryStorage};

type BenchOrchestrator =
    CheckoutOrchestrator<InMemoryStorage, InMemoryPaymentGateway, InMemoryReconciliationLog>;

fn orchestrator(storage: &InMemoryStorage) -> BenchOrchestrator {
    CheckoutOrchestrator::new(
        storage.clone(),
        InMemoryPaymentGateway::new(),
        InMemoryReconciliationLog::new(),
        CheckoutConfig::default(),
    )
}

async fn fill_cart(storage: &InMemoryStorage, customer: &CustomerId, skus: &[Sku]) {
    for sku in skus {
        let line = CartLine::new(sku.clone(), "Item", Money::from_cents(999), 1).unwrap();
        storage.add_line(customer, line).await.unwrap();
    }
}

fn bench_checkout_single_line(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let storage = InMemoryStorage::new();
    let orchestrator = orchestrator(&storage);
    let sku = Sku::parse("SKU-1").unwrap();
    let customer = CustomerId::parse("bench").unwrap();
    rt.block_on(storage.set_stock(sku.clone(), u32::MAX));

    c.bench_function("checkout/single_line", |b| {
        b.iter(|| {
            rt.block_on(async {
                fill_cart(&storage, &customer, std::slice::from_ref(&sku)).await;
                orchestrator
                    .checkout(CheckoutRequest::new("bench", "tok"))
                    .await
                    .unwrap();
            });
        });
    });
}

fn bench_checkout_ten_lines(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let storage = InMemoryStorage::new();
    let orchestrator = orchestrator(&storage);
    let skus: Vec<Sku> = (0..10)
        .map(|i| Sku::parse(format!("SKU-{i:02}")).unwrap())
        .collect();
    let customer = CustomerId::parse("bench").unwrap();
    rt.block_on(async {
        for sku in &skus {
            storage.set_stock(sku.clone(), u32::MAX).await;
        }
    });

    c.bench_function("checkout/ten_lines", |b| {
        b.iter(|| {
            rt.block_on(async {
                fill_cart(&storage, &customer, &skus).await;
                orchestrator
                    .checkout(CheckoutRequest::new("bench", "tok"))
                    .await
                    .unwrap();
            });
        });
    });
}

fn bench_contended_sku(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let storage = InMemoryStorage::new();
    let orchestrator = std::sync::Arc::new(orchestrator(&storage));
    let sku = Sku::parse("SKU-HOT").unwrap();
    let customers: Vec<CustomerId> = (0..8)
        .map(|i| CustomerId::parse(format!("bench-{i}")).unwrap())
        .collect();
    rt.block_on(storage.set_stock(sku.clone(), u32::MAX));

    c.bench_function("checkout/contended_sku_8_way", |b| {
        b.iter(|| {
            rt.block_on(async {
                let mut tasks = Vec::with_capacity(customers.len());
                for customer in &customers {
                    fill_cart(&storage, customer, std::slice::from_ref(&sku)).await;
                    let orchestrator = std::sync::Arc::clone(&orchestrator);
                    let request = CheckoutRequest::new(customer.as_str(), "tok");
                    tasks.push(tokio::spawn(async move { orchestrator.checkout(request).await }));
                }
                for task in tasks {
                    task.await.unwrap().unwrap();
                }
            });
        });
    });
}

criterion_group!(
    benches,
    bench_checkout_single_line,
    bench_checkout_ten_lines,
    bench_contended_sku
);
criterion_main!(benches);
