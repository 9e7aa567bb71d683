//! Azure plugin tests against the in-memory ARM mock.

use super::AzureCloud;
use crate::cloudresource::{
    CloudResource, CloudResourceId, CloudResourceType, CloudRule, EgressRule, IngressRule, Rule,
};
use crate::error::CloudError;
use crate::provider::{CloudInterface, CloudProviderType};
use crate::secret::memory::MemorySecretReader;
use crate::types::NamespacedName;
use azure_client::{
    ApplicationSecurityGroup, IpConfiguration, IpConfigurationProperties, MockAzureClient,
    MockAzureClientFactory, NetworkInterface, NetworkInterfaceProperties, NetworkInterfaceRow,
    SecurityRule, SecurityRuleProperties, SubResource, VirtualMachineRow, VirtualNetwork,
};
use crds::{
    CloudEntitySelector, CloudEntitySelectorSpec, CloudProviderAccount,
    CloudProviderAccountAzureConfig, CloudProviderAccountSpec, SecretReference,
};
use kube::core::ObjectMeta;
use std::sync::Arc;

const TEST_NAMESPACE: &str = "namespace01";
const TEST_ACCOUNT: &str = "account01";
const TEST_SUB: &str = "SubID";
const TEST_RG: &str = "testRG";
const TEST_POLICY: &str = "test-anp-ns/test-anp";
const AT_ASG_NAME: &str = "nephe-at-atapplicationsgid";
const AG_ASG_NAME: &str = "nephe-ag-agapplicationsgid";

fn vnet_id(name: &str) -> String {
    format!(
        "/subscriptions/{TEST_SUB}/resourceGroups/{TEST_RG}/providers/Microsoft.Network/virtualNetworks/{name}"
    )
}

fn asg_id(name: &str) -> String {
    format!(
        "/subscriptions/{TEST_SUB}/resourceGroups/{TEST_RG}/providers/Microsoft.Network/applicationSecurityGroups/{name}"
    )
}

fn nic_id(name: &str) -> String {
    format!(
        "/subscriptions/{TEST_SUB}/resourceGroups/{TEST_RG}/providers/Microsoft.Network/networkInterfaces/{name}"
    )
}

fn account_key() -> NamespacedName {
    NamespacedName::new(TEST_NAMESPACE, TEST_ACCOUNT)
}

fn test_account() -> CloudProviderAccount {
    CloudProviderAccount {
        metadata: ObjectMeta {
            name: Some(TEST_ACCOUNT.to_string()),
            namespace: Some(TEST_NAMESPACE.to_string()),
            ..Default::default()
        },
        spec: CloudProviderAccountSpec {
            poll_interval_in_seconds: Some(1),
            aws_config: None,
            azure_config: Some(CloudProviderAccountAzureConfig {
                region: "eastus".to_string(),
                secret_ref: SecretReference {
                    name: TEST_ACCOUNT.to_string(),
                    namespace: TEST_NAMESPACE.to_string(),
                    key: "credentials".to_string(),
                },
            }),
        },
        status: None,
    }
}

fn test_vnet(name: &str) -> VirtualNetwork {
    VirtualNetwork {
        id: Some(vnet_id(name)),
        name: Some(name.to_string()),
        location: Some("eastus".to_string()),
        properties: None,
    }
}

fn test_asg(name: &str) -> ApplicationSecurityGroup {
    ApplicationSecurityGroup {
        id: Some(asg_id(name)),
        name: Some(name.to_string()),
        location: Some("eastus".to_string()),
    }
}

fn applied_to_group(vnet: &str) -> CloudResource {
    CloudResource {
        resource_type: CloudResourceType::VirtualMachine,
        id: CloudResourceId::new("atapplicationsgID", vnet_id(vnet)),
        account_id: account_key().to_string(),
        cloud_provider: CloudProviderType::Azure,
    }
}

fn ingress_cidr_rule(port: u16, cidr: &str, policy: &str) -> CloudRule {
    CloudRule::new(
        Rule::Ingress(IngressRule {
            from_port: Some(port),
            from_src_ip: vec![cidr.parse().unwrap()],
            from_security_groups: vec![],
            protocol: Some(6),
        }),
        policy,
        AT_ASG_NAME,
    )
}

fn ingress_sg_rule(port: u16, peer: &str, vnet: &str, policy: &str) -> CloudRule {
    CloudRule::new(
        Rule::Ingress(IngressRule {
            from_port: Some(port),
            from_src_ip: vec![],
            from_security_groups: vec![CloudResourceId::new(peer, vnet_id(vnet))],
            protocol: Some(6),
        }),
        policy,
        AT_ASG_NAME,
    )
}

async fn setup() -> (AzureCloud, MockAzureClient) {
    let secrets = MemorySecretReader::new();
    secrets.insert(
        TEST_NAMESPACE,
        TEST_ACCOUNT,
        "credentials",
        br#"{"subscriptionId": "SubID", "clientId": "ClientID", "tenantId": "TenantID", "clientKey": "ClientKey"}"#,
    );
    let mock = MockAzureClient::new();
    mock.add_virtual_network(test_vnet("testVnet01"));
    mock.add_virtual_network(test_vnet("testVnet02"));
    mock.add_application_security_group(TEST_RG, test_asg(AT_ASG_NAME));
    mock.add_application_security_group(TEST_RG, test_asg(AG_ASG_NAME));

    let cloud = AzureCloud::new(Arc::new(MockAzureClientFactory::new(mock.clone())));
    cloud
        .add_provider_account(&secrets, &test_account())
        .await
        .unwrap();
    cloud.do_inventory_poll(&account_key()).await.unwrap();
    (cloud, mock)
}

#[tokio::test]
async fn creates_asg_and_per_vnet_nsg_and_returns_id() {
    let (cloud, mock) = setup().await;

    let group = CloudResource {
        resource_type: CloudResourceType::VirtualMachine,
        id: CloudResourceId::new("Web", vnet_id("testVnet01")),
        account_id: account_key().to_string(),
        cloud_provider: CloudProviderType::Azure,
    };
    let id = cloud.create_security_group(&group, false).await.unwrap();
    assert!(id.to_lowercase().contains("nephe-at-web"));
    assert!(mock
        .network_security_group(TEST_RG, "nephe-vnet-testvnet01-nsg")
        .is_some());

    // Membership-only: ASG only, no NSG for the second vnet.
    let membership = CloudResource {
        resource_type: CloudResourceType::VirtualMachine,
        id: CloudResourceId::new("Web", vnet_id("testVnet02")),
        account_id: account_key().to_string(),
        cloud_provider: CloudProviderType::Azure,
    };
    cloud.create_security_group(&membership, true).await.unwrap();
    assert!(mock
        .network_security_group(TEST_RG, "nephe-vnet-testvnet02-nsg")
        .is_none());
}

#[tokio::test]
async fn fails_to_create_security_group_for_unknown_vnet() {
    let (cloud, mock) = setup().await;
    let group = CloudResource {
        resource_type: CloudResourceType::VirtualMachine,
        id: CloudResourceId::new("Web", vnet_id("testVnet03")),
        account_id: account_key().to_string(),
        cloud_provider: CloudProviderType::Azure,
    };
    let err = cloud.create_security_group(&group, false).await.unwrap_err();
    assert!(matches!(err, CloudError::VpcNotInSnapshot { .. }));
    assert!(mock.nsg_updates().is_empty());
}

#[tokio::test]
async fn updates_ipv6_security_rules() {
    let (cloud, mock) = setup().await;
    let rules = vec![ingress_cidr_rule(
        22,
        "2600:1f16:c77:a001:fb97:21b2:a8dc:dc60/128",
        TEST_POLICY,
    )];
    cloud
        .update_security_group_rules(&applied_to_group("testVnet01"), &[], &[], &rules)
        .await
        .unwrap();

    let (_, name, nsg) = mock.nsg_updates().pop().unwrap();
    assert_eq!(name, "nephe-vnet-testvnet01-nsg");
    let pushed = nsg.properties.unwrap().security_rules;
    // One allow rule plus the two default-deny rules.
    assert_eq!(pushed.len(), 3);
    let allow = pushed
        .iter()
        .find(|r| {
            r.properties.as_ref().and_then(|p| p.access.as_deref()) == Some("Allow")
        })
        .unwrap();
    let properties = allow.properties.as_ref().unwrap();
    assert_eq!(properties.priority, Some(100));
    assert_eq!(
        properties.source_address_prefixes,
        vec!["2600:1f16:c77:a001:fb97:21b2:a8dc:dc60/128".to_string()]
    );
    assert_eq!(properties.destination_port_range.as_deref(), Some("22"));
    assert_eq!(
        properties.destination_application_security_groups[0]
            .id
            .as_deref(),
        Some(asg_id(AT_ASG_NAME).as_str())
    );

    let denies: Vec<_> = pushed
        .iter()
        .filter(|r| {
            r.properties.as_ref().and_then(|p| p.access.as_deref()) == Some("Deny")
        })
        .collect();
    assert_eq!(denies.len(), 2);
    assert!(denies.iter().all(|r| r
        .properties
        .as_ref()
        .unwrap()
        .priority
        == Some(4096)));
}

#[tokio::test]
async fn retains_duplicate_ingress_rules_with_distinct_peers() {
    let (cloud, mock) = setup().await;
    mock.add_application_security_group(TEST_RG, test_asg(&format!("{AG_ASG_NAME}1")));
    mock.add_application_security_group(TEST_RG, test_asg(&format!("{AG_ASG_NAME}2")));

    // All four collide on (direction, protocol, port) but differ in peer
    // spec; every one must be retained as its own cloud rule.
    let rules = vec![
        ingress_cidr_rule(22, "2600:1f16:c77:a001:fb97:21b2:a8dc:dc60/128", TEST_POLICY),
        ingress_cidr_rule(22, "2600:1f16:c77:a001:fb97:21b2:a8dc:dc61/128", TEST_POLICY),
        ingress_sg_rule(22, "agapplicationsgID1", "testVnet01", TEST_POLICY),
        ingress_sg_rule(22, "agapplicationsgID2", "testVnet01", TEST_POLICY),
    ];
    cloud
        .update_security_group_rules(&applied_to_group("testVnet01"), &[], &[], &rules)
        .await
        .unwrap();

    let (_, _, nsg) = mock.nsg_updates().pop().unwrap();
    // 4 allow rules and 2 deny rules.
    assert_eq!(nsg.properties.unwrap().security_rules.len(), 6);
}

#[tokio::test]
async fn retains_duplicate_egress_rules_with_distinct_peers() {
    let (cloud, mock) = setup().await;
    mock.add_application_security_group(TEST_RG, test_asg(&format!("{AG_ASG_NAME}1")));
    mock.add_application_security_group(TEST_RG, test_asg(&format!("{AG_ASG_NAME}2")));

    let egress = |cidr: Option<&str>, peer: Option<&str>| {
        CloudRule::new(
            Rule::Egress(EgressRule {
                to_port: Some(23),
                to_dst_ip: cidr.map(|c| c.parse().unwrap()).into_iter().collect(),
                to_security_groups: peer
                    .map(|p| CloudResourceId::new(p, vnet_id("testVnet01")))
                    .into_iter()
                    .collect(),
                protocol: Some(6),
            }),
            TEST_POLICY,
            AT_ASG_NAME,
        )
    };
    let rules = vec![
        egress(Some("2600:1f16:c77:a001:fb97:21b2:a8dc:dc60/128"), None),
        egress(Some("2600:1f16:c77:a001:fb97:21b2:a8dc:dc61/128"), None),
        egress(None, Some("agapplicationsgID1")),
        egress(None, Some("agapplicationsgID2")),
    ];
    cloud
        .update_security_group_rules(&applied_to_group("testVnet01"), &[], &[], &rules)
        .await
        .unwrap();

    let (_, _, nsg) = mock.nsg_updates().pop().unwrap();
    assert_eq!(nsg.properties.unwrap().security_rules.len(), 6);
}

#[tokio::test]
async fn fully_colliding_rules_keep_the_first() {
    let (cloud, mock) = setup().await;
    let rules = vec![
        ingress_cidr_rule(22, "192.168.1.0/24", TEST_POLICY),
        ingress_cidr_rule(22, "192.168.1.0/24", TEST_POLICY),
    ];
    cloud
        .update_security_group_rules(&applied_to_group("testVnet01"), &[], &[], &rules)
        .await
        .unwrap();
    let (_, _, nsg) = mock.nsg_updates().pop().unwrap();
    // 1 deduplicated allow rule and 2 deny rules.
    assert_eq!(nsg.properties.unwrap().security_rules.len(), 3);
}

#[tokio::test]
async fn rejects_rules_without_policy_identity() {
    let (cloud, mock) = setup().await;
    let rules = vec![ingress_cidr_rule(22, "192.168.1.0/24", "")];
    let err = cloud
        .update_security_group_rules(&applied_to_group("testVnet01"), &[], &[], &rules)
        .await
        .unwrap_err();
    assert!(matches!(err, CloudError::RuleMissingDescription { .. }));
    assert!(mock.nsg_updates().is_empty());
}

#[tokio::test]
async fn fails_when_applied_to_asg_is_missing() {
    let (cloud, _) = setup().await;
    let group = CloudResource {
        resource_type: CloudResourceType::VirtualMachine,
        id: CloudResourceId::new("nsgID", vnet_id("testVnet01")),
        account_id: account_key().to_string(),
        cloud_provider: CloudProviderType::Azure,
    };
    let rules = vec![ingress_cidr_rule(22, "192.168.1.0/24", TEST_POLICY)];
    let err = cloud
        .update_security_group_rules(&group, &[], &[], &rules)
        .await
        .unwrap_err();
    assert!(matches!(err, CloudError::Azure(_)));
}

#[tokio::test]
async fn preserves_priorities_of_wire_equal_rules() {
    let (cloud, mock) = setup().await;
    let existing_description =
        crate::cloudresource::CloudRuleDescription::encode(TEST_POLICY).unwrap();
    mock.add_network_security_group(
        TEST_RG,
        azure_client::SecurityGroup {
            id: None,
            name: Some("nephe-vnet-testvnet01-nsg".to_string()),
            location: Some("eastus".to_string()),
            properties: Some(azure_client::SecurityGroupProperties {
                security_rules: vec![SecurityRule {
                    id: None,
                    name: Some("nephe-in-0".to_string()),
                    properties: Some(SecurityRuleProperties {
                        description: Some(existing_description),
                        protocol: Some("Tcp".to_string()),
                        source_port_range: Some("*".to_string()),
                        destination_port_range: Some("22".to_string()),
                        source_address_prefixes: vec!["192.168.1.0/24".to_string()],
                        destination_application_security_groups: vec![SubResource::new(
                            asg_id(AT_ASG_NAME),
                        )],
                        access: Some("Allow".to_string()),
                        priority: Some(150),
                        direction: Some("Inbound".to_string()),
                        ..Default::default()
                    }),
                }],
            }),
        },
    );

    let rules = vec![ingress_cidr_rule(22, "192.168.1.0/24", TEST_POLICY)];
    cloud
        .update_security_group_rules(&applied_to_group("testVnet01"), &[], &[], &rules)
        .await
        .unwrap();
    let (_, _, nsg) = mock.nsg_updates().pop().unwrap();
    let allow = nsg
        .properties
        .unwrap()
        .security_rules
        .into_iter()
        .find(|r| {
            r.properties.as_ref().and_then(|p| p.access.as_deref()) == Some("Allow")
        })
        .unwrap();
    assert_eq!(allow.properties.unwrap().priority, Some(150));
}

#[tokio::test]
async fn updates_members_via_asg_references_on_nic_ip_configurations() {
    let (cloud, mock) = setup().await;
    let key = account_key();

    let vm_id = format!(
        "/subscriptions/{TEST_SUB}/resourceGroups/{TEST_RG}/providers/Microsoft.Compute/virtualMachines/testvm01"
    );
    mock.add_vm_row(VirtualMachineRow {
        id: vm_id.clone(),
        name: "testvm01".to_string(),
        vnet_id: Some(vnet_id("testVnet01")),
        tags: None,
        network_interfaces: vec![NetworkInterfaceRow {
            id: Some(nic_id("testnic01")),
            private_ips: vec!["10.0.0.4".to_string()],
            public_ips: vec![],
        }],
    });
    mock.add_network_interface(
        TEST_RG,
        NetworkInterface {
            id: Some(nic_id("testnic01")),
            name: Some("testnic01".to_string()),
            location: Some("eastus".to_string()),
            properties: Some(NetworkInterfaceProperties {
                ip_configurations: vec![IpConfiguration {
                    name: Some("ipconfig1".to_string()),
                    properties: Some(IpConfigurationProperties {
                        private_ip_address: Some("10.0.0.4".to_string()),
                        subnet: None,
                        application_security_groups: vec![],
                    }),
                }],
                virtual_machine: Some(SubResource::new(vm_id.clone())),
            }),
        },
    );

    // Selector so the poll surfaces the VM into the snapshot.
    let selector = CloudEntitySelector {
        metadata: ObjectMeta {
            name: Some("selector01".to_string()),
            namespace: Some(TEST_NAMESPACE.to_string()),
            ..Default::default()
        },
        spec: CloudEntitySelectorSpec {
            account_name: TEST_ACCOUNT.to_string(),
            account_namespace: Some(TEST_NAMESPACE.to_string()),
            vm_selector: vec![],
        },
        status: None,
    };
    cloud
        .add_account_resource_selector(&key, &selector)
        .await
        .unwrap();
    cloud.do_inventory_poll(&key).await.unwrap();

    let group = applied_to_group("testVnet01");
    let member = CloudResource {
        resource_type: CloudResourceType::VirtualMachine,
        id: CloudResourceId::new(vm_id.to_lowercase(), vnet_id("testVnet01")),
        account_id: account_key().to_string(),
        cloud_provider: CloudProviderType::Azure,
    };
    cloud
        .update_security_group_members(&group, &[member], false)
        .await
        .unwrap();
    let (_, _, updated) = mock.nic_updates().pop().unwrap();
    let asgs = &updated.properties.unwrap().ip_configurations[0]
        .properties
        .as_ref()
        .unwrap()
        .application_security_groups;
    assert_eq!(asgs.len(), 1);
    assert_eq!(asgs[0].id.as_deref(), Some(asg_id(AT_ASG_NAME).as_str()));

    // Emptying the membership removes the reference again.
    cloud
        .update_security_group_members(&group, &[], false)
        .await
        .unwrap();
    let (_, _, updated) = mock.nic_updates().pop().unwrap();
    assert!(updated.properties.unwrap().ip_configurations[0]
        .properties
        .as_ref()
        .unwrap()
        .application_security_groups
        .is_empty());
}

#[tokio::test]
async fn delete_security_group_removes_asg_and_idle_nsg() {
    let (cloud, mock) = setup().await;
    let group = applied_to_group("testVnet01");
    // Seed the NSG as create_security_group would have.
    let created = CloudResource {
        resource_type: CloudResourceType::VirtualMachine,
        id: CloudResourceId::new("atapplicationsgID", vnet_id("testVnet01")),
        account_id: account_key().to_string(),
        cloud_provider: CloudProviderType::Azure,
    };
    cloud.create_security_group(&created, false).await.unwrap();
    assert!(mock
        .network_security_group(TEST_RG, "nephe-vnet-testvnet01-nsg")
        .is_some());

    cloud.delete_security_group(&group, false).await.unwrap();
    assert!(mock
        .network_security_group(TEST_RG, "nephe-vnet-testvnet01-nsg")
        .is_none());

    // Deleting an absent group is success.
    cloud.delete_security_group(&group, false).await.unwrap();
}

#[tokio::test]
async fn credential_failure_registers_account_with_sentinel_credentials() {
    let secrets = MemorySecretReader::new();
    let mock = MockAzureClient::new();
    let factory = MockAzureClientFactory::new(mock.clone());
    let cloud = AzureCloud::new(Arc::new(factory.clone()));

    let err = cloud
        .add_provider_account(&secrets, &test_account())
        .await
        .unwrap_err();
    assert!(err.should_retry());
    assert!(!cloud.is_credentials_valid(&account_key()).await);
    assert_eq!(factory.create_count(), 0);

    // The account exists but polls fail cleanly instead of panicking.
    let poll_err = cloud.do_inventory_poll(&account_key()).await.unwrap_err();
    assert!(matches!(poll_err, CloudError::CredentialResolution(_)));
}
