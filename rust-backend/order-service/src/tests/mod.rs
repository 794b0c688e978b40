mod support;

mod checkout_flow;
